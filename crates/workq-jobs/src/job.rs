//! Job contract and definitions.

use crate::error::{JobError, JobResult};
use crate::jobs::JobServices;
use crate::outcome::JobOutcome;
use crate::retry::{default_should_retry, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Opaque key-value payload carried by every job.
pub type JobPayload = serde_json::Map<String, Value>;

/// Unique job identifier.
///
/// Ids are UUID v7, so they sort roughly by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new time-ordered job ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a job's durable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in a queue or the delayed set.
    Queued,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed permanently.
    Failed,
    /// Cancelled by an outside collaborator.
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Returns the storage name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if no further transition happens inside the engine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Returns true if a record in this status may be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(JobError::Internal(format!("Unknown job status: {other}"))),
        }
    }
}

/// Scheduling settings shared by every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Sort score in the queue; lower is more urgent.
    pub priority: i32,
    /// Queue the job is placed on.
    pub queue_name: String,
    /// Execution budget in seconds.
    pub timeout_secs: u64,
    /// Maximum number of execution attempts.
    pub retry_attempts: u32,
    /// Per-attempt retry delays in seconds.
    pub retry_backoff: Vec<u64>,
}

impl JobSettings {
    /// Default settings placed on the given queue.
    pub fn on_queue(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            priority: 10,
            queue_name: "default".to_string(),
            timeout_secs: 300,
            retry_attempts: 3,
            retry_backoff: vec![60, 300, 900],
        }
    }
}

/// Self-describing storage form of a job.
///
/// `job_type` is mandatory: a record without one is never rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Registered job type tag.
    pub job_type: String,
    /// Job payload.
    #[serde(default)]
    pub payload: JobPayload,
    /// Scheduling settings.
    #[serde(default)]
    pub settings: JobSettings,
}

impl JobRecord {
    /// Decodes the payload into a typed structure.
    pub fn typed_payload<T: serde::de::DeserializeOwned>(&self) -> JobResult<T> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| JobError::InvalidPayload(format!("{}: {e}", self.job_type)))
    }
}

/// Converts a serializable value into a job payload map.
pub fn payload_from<T: Serialize>(value: &T) -> JobResult<JobPayload> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(JobError::InvalidPayload(format!(
            "payload must be an object, got {other}"
        ))),
    }
}

/// Why a job execution did not succeed.
#[derive(Debug)]
pub enum FailureCause {
    /// `execute()` returned an error, panicked or timed out.
    Thrown(JobError),
    /// `execute()` returned an unsuccessful outcome.
    Logical {
        /// Human-readable reason.
        reason: String,
        /// Error code reported by the job, if any.
        code: Option<String>,
    },
}

impl FailureCause {
    /// Builds a logical failure from an unsuccessful outcome.
    pub fn from_outcome(outcome: &JobOutcome) -> Self {
        FailureCause::Logical {
            reason: outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "job reported failure".to_string()),
            code: outcome.error_code.clone(),
        }
    }

    /// Returns the failure message.
    pub fn message(&self) -> String {
        match self {
            FailureCause::Thrown(err) => err.to_string(),
            FailureCause::Logical { reason, .. } => reason.clone(),
        }
    }

    /// Returns the error code stored with the failure.
    pub fn error_code(&self) -> &str {
        match self {
            FailureCause::Thrown(err) => err.error_code(),
            FailureCause::Logical { code, .. } => code.as_deref().unwrap_or("logical_failure"),
        }
    }

    /// Returns true for a logical failure.
    pub fn is_logical(&self) -> bool {
        matches!(self, FailureCause::Logical { .. })
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Thrown(err) => write!(f, "thrown: {err}"),
            FailureCause::Logical { reason, .. } => write!(f, "logical: {reason}"),
        }
    }
}

/// Job execution context.
#[derive(Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Maximum attempts allowed.
    pub max_attempts: u32,

    /// Queue name.
    pub queue: String,

    /// Side-effect collaborators available to jobs.
    pub services: Arc<JobServices>,
}

impl JobContext {
    /// Returns true if this is the last attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Returns remaining attempts.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Polymorphic unit of work.
///
/// The trait is object safe: the engine only ever handles `Box<dyn Job>`
/// rebuilt through the [`JobRegistry`](crate::registry::JobRegistry).
/// Concrete types also implement [`JobDefinition`] to be registrable.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Debug)]
/// struct Cleanup { settings: JobSettings, table: String }
///
/// #[async_trait::async_trait]
/// impl Job for Cleanup {
///     fn job_type(&self) -> &str { Self::JOB_TYPE }
///     fn settings(&self) -> &JobSettings { &self.settings }
///     fn payload(&self) -> JobResult<JobPayload> {
///         payload_from(&serde_json::json!({ "table": self.table }))
///     }
///     async fn execute(&self, _ctx: &JobContext) -> Result<JobOutcome, JobError> {
///         Ok(JobOutcome::success(serde_json::Value::Null))
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + fmt::Debug {
    /// Registered type tag of this job.
    fn job_type(&self) -> &str;

    /// Scheduling settings.
    fn settings(&self) -> &JobSettings;

    /// Job payload.
    fn payload(&self) -> JobResult<JobPayload>;

    /// Execute the job.
    ///
    /// `Err` is a thrown failure; an outcome with `successful == false` is a
    /// logical failure.
    async fn execute(&self, ctx: &JobContext) -> Result<JobOutcome, JobError>;

    fn priority(&self) -> i32 {
        self.settings().priority
    }

    fn queue_name(&self) -> &str {
        &self.settings().queue_name
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings().timeout_secs)
    }

    fn retry_attempts(&self) -> u32 {
        self.settings().retry_attempts
    }

    fn retry_backoff(&self) -> &[u64] {
        &self.settings().retry_backoff
    }

    /// Called once the job has failed permanently.
    fn handle_failure(&self, cause: &FailureCause, attempt: u32) {
        warn!(
            job_type = %self.job_type(),
            attempt,
            error = %cause,
            "Job failed permanently"
        );
    }

    /// Decides whether a failed attempt is retried.
    fn should_retry(&self, cause: &FailureCause, attempt: u32) -> bool {
        default_should_retry(cause, attempt, self.retry_attempts())
    }

    /// Delay before the given attempt is retried.
    fn retry_delay(&self, attempt: u32) -> Duration {
        RetryPolicy::new(self.retry_attempts(), self.retry_backoff().to_vec())
            .delay_for_attempt(attempt)
    }

    /// Serializes the job into its self-describing record.
    fn to_record(&self) -> JobResult<JobRecord> {
        let job_type = self.job_type();
        if job_type.is_empty() {
            return Err(JobError::MissingJobType);
        }
        Ok(JobRecord {
            job_type: job_type.to_string(),
            payload: self.payload()?,
            settings: self.settings().clone(),
        })
    }
}

/// A concrete job type that can be rebuilt from its record.
pub trait JobDefinition: Job + Sized + 'static {
    /// Unique type tag for this job.
    const JOB_TYPE: &'static str;

    /// Rebuilds the job from its record.
    fn from_record(record: JobRecord) -> JobResult<Self>;

    /// Mutable access to the scheduling settings.
    fn settings_mut(&mut self) -> &mut JobSettings;

    /// Sets the priority.
    #[must_use]
    fn with_priority(mut self, priority: i32) -> Self {
        self.settings_mut().priority = priority;
        self
    }

    /// Places the job on a queue.
    #[must_use]
    fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.settings_mut().queue_name = queue_name.into();
        self
    }

    /// Sets the execution budget.
    #[must_use]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings_mut().timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.settings_mut().retry_attempts = attempts;
        self
    }

    /// Sets the per-attempt retry delays in seconds.
    #[must_use]
    fn with_backoff(mut self, backoff: Vec<u64>) -> Self {
        self.settings_mut().retry_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_unique_and_ordered() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_status_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_rules() {
        assert!(JobStatus::Queued.can_cancel());
        assert!(JobStatus::Failed.can_cancel());
        assert!(!JobStatus::Processing.can_cancel());
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = JobSettings::default();
        assert_eq!(settings.priority, 10);
        assert_eq!(settings.queue_name, "default");
        assert_eq!(settings.timeout_secs, 300);
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.retry_backoff, vec![60, 300, 900]);
    }

    #[test]
    fn test_record_requires_job_type() {
        let err = serde_json::from_str::<JobRecord>(r#"{"payload": {}}"#).unwrap_err();
        assert!(err.to_string().contains("job_type"));
    }

    #[test]
    fn test_payload_from_rejects_non_objects() {
        assert!(payload_from(&serde_json::json!({"a": 1})).is_ok());
        assert!(matches!(
            payload_from(&42),
            Err(JobError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_failure_cause_codes() {
        let thrown = FailureCause::Thrown(JobError::Timeout(5));
        assert_eq!(thrown.error_code(), "timeout");
        assert!(!thrown.is_logical());

        let logical = FailureCause::from_outcome(&JobOutcome::failure("bounced", None));
        assert_eq!(logical.error_code(), "logical_failure");
        assert_eq!(logical.message(), "bounced");
    }
}
