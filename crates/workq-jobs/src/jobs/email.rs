//! Email delivery job.

use super::MailMessage;
use crate::error::{JobError, JobResult};
use crate::job::{
    payload_from, FailureCause, Job, JobContext, JobDefinition, JobPayload, JobRecord, JobSettings,
};
use crate::outcome::JobOutcome;
use crate::retry::default_should_retry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Recipients above this count make a bulk send.
const BULK_THRESHOLD: usize = 1;

/// Bulk sends are not retried past this attempt.
const BULK_MAX_ATTEMPT: u32 = 2;

/// Email job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl EmailPayload {
    /// Checks addresses and subject.
    pub fn validate(&self) -> JobResult<()> {
        if self.to.is_empty() {
            return Err(JobError::InvalidPayload("email has no recipients".into()));
        }
        if self.subject.trim().is_empty() {
            return Err(JobError::InvalidPayload("email subject is empty".into()));
        }
        let addresses = self
            .to
            .iter()
            .chain(self.from.iter())
            .chain(self.reply_to.iter());
        for address in addresses {
            if !is_valid_address(address) {
                return Err(JobError::InvalidPayload(format!(
                    "invalid email address: {address}"
                )));
            }
        }
        Ok(())
    }
}

fn is_valid_address(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !address.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Sends one message per recipient through the configured mail transport.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailJob {
    settings: JobSettings,
    payload: EmailPayload,
}

impl EmailJob {
    /// Builds a validated email job on the `email` queue.
    pub fn new(payload: EmailPayload) -> JobResult<Self> {
        payload.validate()?;
        Ok(Self {
            settings: JobSettings::on_queue("email"),
            payload,
        })
    }

    /// Single-recipient shorthand.
    pub fn to(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> JobResult<Self> {
        Self::new(EmailPayload {
            to: vec![recipient.into()],
            subject: subject.into(),
            body: body.into(),
            from: None,
            reply_to: None,
        })
    }

    /// The typed payload.
    pub fn email(&self) -> &EmailPayload {
        &self.payload
    }

    fn is_bulk(&self) -> bool {
        self.payload.to.len() > BULK_THRESHOLD
    }
}

#[async_trait]
impl Job for EmailJob {
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
        let transport = ctx.services.mail()?;

        let total = self.payload.to.len();
        let mut sent = 0usize;
        let mut last_error = None;

        for recipient in &self.payload.to {
            let message = MailMessage {
                to: recipient.clone(),
                from: self.payload.from.clone(),
                reply_to: self.payload.reply_to.clone(),
                subject: self.payload.subject.clone(),
                body: self.payload.body.clone(),
            };
            match transport.send(&message).await {
                Ok(()) => {
                    sent += 1;
                    debug!(job_id = %ctx.job_id, recipient = %recipient, "Email sent");
                }
                Err(e) => {
                    warn!(job_id = %ctx.job_id, recipient = %recipient, error = %e, "Email send failed");
                    last_error = Some(e);
                }
            }
        }

        let failed = total - sent;
        match last_error {
            None => Ok(JobOutcome::success(json!({ "sent": sent }))),
            Some(e) if sent == 0 => Err(JobError::Execution(format!(
                "all {total} sends failed, last error: {e}"
            ))),
            Some(_) => Ok(
                JobOutcome::failure(format!("{failed} of {total} sends failed"), Some("partial_send"))
                    .with_metadata("sent", sent)
                    .with_metadata("failed", failed),
            ),
        }
    }

    /// Logical failures are never retried, and bulk sends stop after the
    /// second attempt since partial failures are expected.
    fn should_retry(&self, cause: &FailureCause, attempt: u32) -> bool {
        if cause.is_logical() {
            return false;
        }
        if self.is_bulk() && attempt >= BULK_MAX_ATTEMPT {
            return false;
        }
        default_should_retry(cause, attempt, self.retry_attempts())
    }
}

impl JobDefinition for EmailJob {
    const JOB_TYPE: &'static str = "email";

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

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk() -> EmailJob {
        EmailJob::new(EmailPayload {
            to: vec!["a@example.com".into(), "b@example.com".into()],
            subject: "Hi".into(),
            body: "Hello".into(),
            from: None,
            reply_to: None,
        })
        .unwrap()
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("user@example.com"));
        assert!(!is_valid_address("user.example.com"));
        assert!(!is_valid_address("@example.com"));
        assert!(!is_valid_address("user@example"));
        assert!(!is_valid_address("us er@example.com"));
        assert!(!is_valid_address("a@b@example.com"));
    }

    #[test]
    fn test_new_rejects_invalid_payload() {
        assert!(matches!(
            EmailJob::to("nobody", "Hi", "Hello"),
            Err(JobError::InvalidPayload(_))
        ));
        assert!(matches!(
            EmailJob::to("a@example.com", " ", "Hello"),
            Err(JobError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_defaults_to_email_queue() {
        let job = EmailJob::to("a@example.com", "Hi", "Hello").unwrap();
        assert_eq!(job.queue_name(), "email");
        assert_eq!(job.priority(), 10);
    }

    #[test]
    fn test_never_retries_logical_failures() {
        let job = EmailJob::to("a@example.com", "Hi", "Hello").unwrap();
        let cause = FailureCause::Logical {
            reason: "1 of 1 sends failed".into(),
            code: Some("partial_send".into()),
        };
        assert!(!job.should_retry(&cause, 1));
    }

    #[test]
    fn test_bulk_send_stops_after_second_attempt() {
        let job = bulk().with_retry_attempts(5);
        let cause = FailureCause::Thrown(JobError::Execution("smtp down".into()));
        assert!(job.should_retry(&cause, 1));
        assert!(!job.should_retry(&cause, 2));
    }

    #[test]
    fn test_single_send_uses_base_policy() {
        let job = EmailJob::to("a@example.com", "Hi", "Hello")
            .unwrap()
            .with_retry_attempts(5);
        let cause = FailureCause::Thrown(JobError::Execution("smtp down".into()));
        assert!(job.should_retry(&cause, 3));
        assert!(!job.should_retry(&cause, 5));
    }
}
