//! Built-in job variants and the collaborators they call.
//!
//! The variants hold no transport code: mail delivery, image work and HTTP
//! calls go through the traits below, supplied by the host in
//! [`JobServices`].

mod api_sync;
mod email;
mod image;

pub use api_sync::{ApiSyncJob, ApiSyncPayload, HttpMethod, RATE_LIMITED};
pub use email::{EmailJob, EmailPayload};
pub use image::{ImageOperation, ImageProcessingJob, ImagePayload};

use crate::error::{JobError, JobResult};
use crate::registry::JobRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One outgoing mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub from: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Delivers mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> JobResult<()>;
}

/// Result of an image pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOutput {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

/// Runs image operations.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(
        &self,
        source: &str,
        operations: &[ImageOperation],
        output: &str,
    ) -> JobResult<ImageOutput>;
}

/// Outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// HTTP response as seen by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Performs HTTP calls. Transport failures are returned as `Err`.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn call(&self, request: &ApiRequest) -> JobResult<ApiResponse>;
}

/// Side-effect collaborators handed to every job through its context.
#[derive(Clone, Default)]
pub struct JobServices {
    mail: Option<Arc<dyn MailTransport>>,
    images: Option<Arc<dyn ImageTransformer>>,
    api: Option<Arc<dyn ApiClient>>,
}

impl JobServices {
    /// No collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mail(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.mail = Some(transport);
        self
    }

    #[must_use]
    pub fn with_images(mut self, transformer: Arc<dyn ImageTransformer>) -> Self {
        self.images = Some(transformer);
        self
    }

    #[must_use]
    pub fn with_api(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.api = Some(client);
        self
    }

    /// The mail transport, or a non-retryable configuration error.
    pub fn mail(&self) -> JobResult<&Arc<dyn MailTransport>> {
        self.mail
            .as_ref()
            .ok_or_else(|| JobError::Configuration("no mail transport configured".into()))
    }

    /// The image transformer, or a non-retryable configuration error.
    pub fn images(&self) -> JobResult<&Arc<dyn ImageTransformer>> {
        self.images
            .as_ref()
            .ok_or_else(|| JobError::Configuration("no image transformer configured".into()))
    }

    /// The API client, or a non-retryable configuration error.
    pub fn api(&self) -> JobResult<&Arc<dyn ApiClient>> {
        self.api
            .as_ref()
            .ok_or_else(|| JobError::Configuration("no API client configured".into()))
    }
}

impl fmt::Debug for JobServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobServices")
            .field("mail", &self.mail.is_some())
            .field("images", &self.images.is_some())
            .field("api", &self.api.is_some())
            .finish()
    }
}

/// Registers `email`, `image_processing` and `api_sync`.
pub fn register_builtin_jobs(registry: &JobRegistry) {
    registry
        .register::<EmailJob>()
        .register::<ImageProcessingJob>()
        .register::<ApiSyncJob>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_services_are_configuration_errors() {
        let services = JobServices::new();
        assert!(matches!(services.mail(), Err(JobError::Configuration(_))));
        assert!(matches!(services.images(), Err(JobError::Configuration(_))));
        assert!(matches!(services.api(), Err(JobError::Configuration(_))));
    }

    #[test]
    fn test_register_builtin_jobs() {
        let registry = JobRegistry::new();
        register_builtin_jobs(&registry);
        assert_eq!(
            registry.job_types(),
            vec!["api_sync".to_string(), "email".to_string(), "image_processing".to_string()]
        );
    }
}
