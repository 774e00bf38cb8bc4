//! External API synchronisation job.

use super::ApiRequest;
use crate::error::{JobError, JobResult};
use crate::job::{
    payload_from, FailureCause, Job, JobContext, JobDefinition, JobPayload, JobRecord, JobSettings,
};
use crate::outcome::JobOutcome;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Error code of a rate-limited call.
pub const RATE_LIMITED: &str = "rate_limited";

/// HTTP method of a sync call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// API sync payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSyncPayload {
    pub sync_type: String,
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ApiSyncPayload {
    /// Checks the sync type and endpoint.
    pub fn validate(&self) -> JobResult<()> {
        if self.sync_type.trim().is_empty() {
            return Err(JobError::InvalidPayload("sync_type is empty".into()));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(JobError::InvalidPayload(format!(
                "endpoint must be an http(s) URL: {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Calls an external API and reports its response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSyncJob {
    settings: JobSettings,
    payload: ApiSyncPayload,
}

impl ApiSyncJob {
    /// Builds a validated job on the `api_sync` queue.
    pub fn new(payload: ApiSyncPayload) -> JobResult<Self> {
        payload.validate()?;
        Ok(Self {
            settings: JobSettings::on_queue("api_sync"),
            payload,
        })
    }

    /// A GET sync of `sync_type` from `endpoint`.
    pub fn get(sync_type: impl Into<String>, endpoint: impl Into<String>) -> JobResult<Self> {
        Self::new(ApiSyncPayload {
            sync_type: sync_type.into(),
            endpoint: endpoint.into(),
            method: HttpMethod::Get,
            body: None,
            headers: BTreeMap::new(),
        })
    }

    /// The typed payload.
    pub fn sync(&self) -> &ApiSyncPayload {
        &self.payload
    }
}

#[async_trait]
impl Job for ApiSyncJob {
    fn job_type(&self) -> &str {
        Self::JOB_TYPE
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn payload(&self) -> JobResult<JobPayload> {
        payload_from(&self.payload)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        self.payload.validate()?;
        let client = ctx.services.api()?;

        let request = ApiRequest {
            method: self.payload.method,
            url: self.payload.endpoint.clone(),
            headers: self.payload.headers.clone(),
            body: self.payload.body.clone(),
        };
        let response = client.call(&request).await?;
        let sync_type = self.payload.sync_type.as_str();

        debug!(job_id = %ctx.job_id, sync_type, status = response.status, "API call returned");

        match response.status {
            200..=299 => Ok(JobOutcome::success(response.body).with_metadata("sync_type", sync_type)),
            429 => {
                warn!(job_id = %ctx.job_id, sync_type, "API rate limited");
                Ok(JobOutcome::failure("rate limited by remote API", Some(RATE_LIMITED))
                    .with_metadata("sync_type", sync_type)
                    .with_metadata("status", response.status))
            }
            400..=499 => Ok(JobOutcome::failure(
                format!("remote API rejected request with {}", response.status),
                Some("client_error"),
            )
            .with_metadata("sync_type", sync_type)
            .with_metadata("status", response.status)),
            500..=599 => Err(JobError::Execution(format!(
                "remote API failed with {}",
                response.status
            ))),
            other => Ok(JobOutcome::failure(
                format!("unexpected status {other}"),
                Some("unexpected_status"),
            )
            .with_metadata("sync_type", sync_type)),
        }
    }

    /// Rate-limited calls are retried; other logical failures are not.
    fn should_retry(&self, cause: &FailureCause, attempt: u32) -> bool {
        match cause {
            FailureCause::Logical { code: Some(code), .. } if code == RATE_LIMITED => {
                attempt < self.retry_attempts()
            }
            FailureCause::Logical { .. } => false,
            FailureCause::Thrown(err) => attempt < self.retry_attempts() && err.is_retryable(),
        }
    }
}

impl JobDefinition for ApiSyncJob {
    const JOB_TYPE: &'static str = "api_sync";

    fn from_record(record: JobRecord) -> JobResult<Self> {
        Ok(Self {
            payload: record.typed_payload()?,
            settings: record.settings,
        })
    }

    fn settings_mut(&mut self) -> &mut JobSettings {
        &mut self.settings
    }
}
