//! Retry policies for failed jobs.

use crate::job::FailureCause;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base delay of the exponential fallback, in seconds.
pub const FALLBACK_BASE_SECS: u64 = 60;

/// Cap of the exponential fallback, in seconds.
pub const FALLBACK_CAP_SECS: u64 = 3600;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Configured delays in seconds, indexed by attempt number.
    pub backoff: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, vec![60, 300, 900])
    }
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(max_attempts: u32, backoff: Vec<u64>) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Creates a policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Vec::new())
    }

    /// Returns true while attempts remain.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculate delay for the given attempt number.
    ///
    /// Attempt `n` (1-based) uses `backoff[n - 1]`; past the end of the
    /// list the delay is `min(2^n * 60, 3600)` seconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let configured = attempt
            .checked_sub(1)
            .and_then(|idx| self.backoff.get(idx as usize));

        let secs = match configured {
            Some(&secs) => secs,
            None => 2u64
                .checked_pow(attempt)
                .and_then(|factor| factor.checked_mul(FALLBACK_BASE_SECS))
                .map_or(FALLBACK_CAP_SECS, |secs| secs.min(FALLBACK_CAP_SECS)),
        };

        Duration::from_secs(secs)
    }
}

/// Base retry decision shared by every job.
///
/// A failed attempt is retried only while attempts remain and the cause is a
/// retryable thrown error. Logical failures are not retried: they are
/// usually deterministic.
pub fn default_should_retry(cause: &FailureCause, attempt: u32, max_attempts: u32) -> bool {
    if attempt >= max_attempts {
        return false;
    }
    match cause {
        FailureCause::Thrown(err) => err.is_retryable(),
        FailureCause::Logical { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;

    #[test]
    fn test_configured_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(900));
    }

    #[test]
    fn test_exponential_fallback() {
        let policy = RetryPolicy::new(10, vec![5]);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(240));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1920));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(3600));
    }

    #[test]
    fn test_fallback_is_capped_for_huge_attempts() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(3600));
    }

    #[test]
    fn test_attempt_zero_uses_fallback() {
        let policy = RetryPolicy::new(3, vec![10]);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(60));
    }

    #[test]
    fn test_has_attempts_left() {
        let policy = RetryPolicy::new(3, vec![]);
        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
    }

    #[test]
    fn test_default_should_retry_thrown() {
        let cause = FailureCause::Thrown(JobError::Execution("boom".into()));
        assert!(default_should_retry(&cause, 1, 3));
        assert!(!default_should_retry(&cause, 3, 3));
    }

    #[test]
    fn test_default_should_retry_non_retryable() {
        let cause = FailureCause::Thrown(JobError::InvalidPayload("bad".into()));
        assert!(!default_should_retry(&cause, 1, 3));
    }

    #[test]
    fn test_default_should_retry_logical() {
        let cause = FailureCause::Logical {
            reason: "validation failed".into(),
            code: None,
        };
        assert!(!default_should_retry(&cause, 1, 3));
    }
}
