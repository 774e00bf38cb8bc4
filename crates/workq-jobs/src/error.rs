//! Job error types.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The sorted-set store is unreachable.
    #[error("Queue store not connected: {0}")]
    NotConnected(String),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Metadata store error.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record carried no job type.
    #[error("Job record carries no job type")]
    MissingJobType,

    /// A record named a job type nobody registered.
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// A stored entry could not be decoded.
    #[error("Malformed queue entry: {0}")]
    MalformedEntry(String),

    /// Job payload failed validation.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// Job execution failed.
    #[error("Job execution failed: {0}")]
    Execution(String),

    /// Job timed out.
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// Job panicked while executing.
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Invalid job state.
    #[error("Invalid job state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Execution(_)
                | JobError::Timeout(_)
                | JobError::Panicked(_)
                | JobError::NotConnected(_)
                | JobError::Redis(_)
                | JobError::Pool(_)
                | JobError::Database(_)
        )
    }

    /// Returns true if the store could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            JobError::NotConnected(_) | JobError::Redis(_) | JobError::Pool(_)
        )
    }

    /// Returns true if a job could not be turned into, or rebuilt from, a record.
    pub fn is_serialization(&self) -> bool {
        matches!(
            self,
            JobError::Serialization(_)
                | JobError::MissingJobType
                | JobError::UnknownJobType(_)
                | JobError::MalformedEntry(_)
        )
    }

    /// Short, stable code stored alongside failed outcomes.
    pub fn error_code(&self) -> &'static str {
        match self {
            JobError::NotConnected(_) | JobError::Redis(_) | JobError::Pool(_) => "store_unavailable",
            JobError::Database(_) => "database",
            JobError::Serialization(_) | JobError::MalformedEntry(_) => "serialization",
            JobError::MissingJobType | JobError::UnknownJobType(_) => "unknown_job_type",
            JobError::InvalidPayload(_) => "invalid_payload",
            JobError::Execution(_) => "execution_failed",
            JobError::Timeout(_) => "timeout",
            JobError::Panicked(_) => "panicked",
            JobError::Configuration(_) => "configuration",
            JobError::NotFound(_) => "not_found",
            JobError::InvalidState { .. } => "invalid_state",
            JobError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_execution_failed() {
        let err = JobError::Execution("oops".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_is_retryable_timeout() {
        let err = JobError::Timeout(30);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_is_retryable_panic() {
        let err = JobError::Panicked("index out of bounds".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_is_not_retryable_invalid_payload() {
        let err = JobError::InvalidPayload("missing recipient".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_is_not_retryable_unknown_type() {
        let err = JobError::UnknownJobType("nope".into());
        assert!(!err.is_retryable());
        assert!(err.is_serialization());
    }

    #[test]
    fn test_is_not_retryable_configuration() {
        let err = JobError::Configuration("no mail transport".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(JobError::NotConnected("refused".into()).is_connectivity());
        assert!(!JobError::Database("gone".into()).is_connectivity());
    }

    #[test]
    fn test_error_display_timeout() {
        let err = JobError::Timeout(60);
        assert!(err.to_string().contains("60"));
    }

    #[test]
    fn test_error_display_invalid_state() {
        let err = JobError::InvalidState {
            expected: "queued".into(),
            actual: "processing".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("queued") && msg.contains("processing"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(JobError::MissingJobType.error_code(), "unknown_job_type");
        assert_eq!(JobError::Timeout(1).error_code(), "timeout");
        assert_eq!(JobError::InvalidPayload(String::new()).error_code(), "invalid_payload");
    }
}
