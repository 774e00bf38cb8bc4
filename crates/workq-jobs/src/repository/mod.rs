//! Durable job metadata store.

mod memory;
mod mysql;

pub use memory::MemoryJobRepository;
pub use mysql::{connect_pool, MySqlJobRepository};

use crate::error::JobResult;
use crate::job::{JobId, JobPayload, JobRecord, JobStatus};
use crate::outcome::JobOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of one job, the system of record for its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadataRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub queue_name: String,
    pub status: JobStatus,
    pub priority: i32,
    /// Executions started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub payload: JobPayload,
    pub result: Option<JobOutcome>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl JobMetadataRecord {
    /// A fresh `queued` record for a job about to be enqueued.
    pub fn queued(job_id: JobId, record: &JobRecord, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            job_type: record.job_type.clone(),
            queue_name: record.settings.queue_name.clone(),
            status: JobStatus::Queued,
            priority: record.settings.priority,
            attempts: 0,
            max_attempts: record.settings.retry_attempts,
            timeout_secs: record.settings.timeout_secs,
            payload: record.payload.clone(),
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            failed_at: None,
        }
    }

    /// Applies a status change and its timestamps.
    pub(crate) fn apply_status(
        &mut self,
        status: JobStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.updated_at = now;
        match status {
            JobStatus::Completed => self.processed_at = Some(now),
            JobStatus::Failed => self.failed_at = Some(now),
            _ => {}
        }
        if let Some(message) = error_message {
            self.error_message = Some(message.to_string());
        }
    }
}

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    /// Count for one status.
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Queued => self.queued,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
        }
    }

    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        let slot = match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
        };
        *slot += count;
    }

    /// Records across every status.
    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.completed + self.failed + self.cancelled
    }
}

/// Operations the engine needs from the metadata store.
///
/// Schema creation belongs to whoever deploys the store.
#[async_trait]
pub trait JobRepository: Send + Sync + std::fmt::Debug {
    /// Inserts a new record.
    async fn insert(&self, record: &JobMetadataRecord) -> JobResult<()>;

    /// Finds a record by id.
    async fn find_by_id(&self, job_id: &JobId) -> JobResult<Option<JobMetadataRecord>>;

    /// Records in a status, oldest first.
    async fn find_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> JobResult<Vec<JobMetadataRecord>>;

    /// Sets the status, stamping `processed_at` or `failed_at`.
    ///
    /// Fails with `NotFound` if the record does not exist.
    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> JobResult<()>;

    /// Sets the status only if the current one is in `expected`.
    ///
    /// Returns false when the record exists in another status.
    async fn transition_status(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        status: JobStatus,
    ) -> JobResult<bool>;

    /// Adds one to the attempt counter and returns the new value.
    async fn increment_attempts(&self, job_id: &JobId) -> JobResult<u32>;

    /// Stores the outcome of the latest execution.
    async fn record_result(&self, job_id: &JobId, outcome: &JobOutcome) -> JobResult<()>;

    /// Number of records per status.
    async fn count_by_status(&self) -> JobResult<StatusCounts>;

    /// Checks the store answers.
    async fn health_check(&self) -> JobResult<()>;
}
