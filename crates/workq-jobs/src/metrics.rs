//! Metrics for queue monitoring.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the host process.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job queue.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "workq_jobs_enqueued_total";
    /// Total jobs dequeued for processing.
    pub const JOBS_DEQUEUED_TOTAL: &str = "workq_jobs_dequeued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "workq_jobs_completed_total";
    /// Total jobs failed permanently.
    pub const JOBS_FAILED_TOTAL: &str = "workq_jobs_failed_total";
    /// Total jobs retried.
    pub const JOBS_RETRIED_TOTAL: &str = "workq_jobs_retried_total";
    /// Total queue entries dropped without processing.
    pub const ENTRIES_DROPPED_TOTAL: &str = "workq_entries_dropped_total";
    /// Total delayed entries promoted into their queue.
    pub const DELAYED_PROMOTED_TOTAL: &str = "workq_delayed_promoted_total";

    /// Current pending jobs per queue.
    pub const JOBS_PENDING: &str = "workq_jobs_pending";
    /// Current delayed jobs.
    pub const JOBS_DELAYED: &str = "workq_jobs_delayed";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "workq_job_duration_seconds";
    /// Batch duration in seconds.
    pub const BATCH_DURATION_SECONDS: &str = "workq_batch_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_DEQUEUED_TOTAL,
        "Total number of jobs dequeued for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that failed permanently"
    );
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_counter!(
        names::ENTRIES_DROPPED_TOTAL,
        "Total number of queue entries dropped without processing"
    );
    describe_counter!(
        names::DELAYED_PROMOTED_TOTAL,
        "Total number of delayed entries moved into their queue"
    );

    describe_gauge!(names::JOBS_PENDING, "Current number of pending jobs");
    describe_gauge!(names::JOBS_DELAYED, "Current number of delayed jobs");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );
    describe_histogram!(names::BATCH_DURATION_SECONDS, "Batch duration in seconds");
}

/// Job metrics recorder.
#[derive(Debug, Clone, Copy)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, job_type: &str, delayed: bool) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "delayed" => delayed.to_string()
        )
        .increment(1);
    }

    /// Record a job dequeued.
    pub fn job_dequeued(queue: &str, job_type: &str) {
        counter!(
            names::JOBS_DEQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(queue: &str, job_type: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job that failed permanently.
    pub fn job_failed(queue: &str, job_type: &str, error_code: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "error_code" => error_code.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job retried.
    pub fn job_retried(queue: &str, job_type: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    /// Record an entry dropped before processing.
    pub fn entry_dropped(queue: &str, reason: &str) {
        counter!(
            names::ENTRIES_DROPPED_TOTAL,
            "queue" => queue.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record delayed entries promoted.
    pub fn delayed_promoted(count: u64) {
        counter!(names::DELAYED_PROMOTED_TOTAL).increment(count);
    }

    /// Update pending count for a queue.
    pub fn set_pending(queue: &str, count: u64) {
        gauge!(names::JOBS_PENDING, "queue" => queue.to_string()).set(count as f64);
    }

    /// Update delayed count.
    pub fn set_delayed(count: u64) {
        gauge!(names::JOBS_DELAYED).set(count as f64);
    }

    /// Record a finished batch.
    pub fn batch_finished(stop_reason: &str, duration: Duration) {
        histogram!(
            names::BATCH_DURATION_SECONDS,
            "stop_reason" => stop_reason.to_string()
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::JOBS_ENQUEUED_TOTAL.starts_with("workq_"));
        assert!(names::JOB_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        JobMetrics::job_enqueued("default", "email", false);
        JobMetrics::set_pending("default", 3);
        JobMetrics::batch_finished("queue_empty", Duration::from_millis(5));
    }
}
