//! In-process metadata store.

use super::{JobMetadataRecord, JobRepository, StatusCounts};
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobStatus};
use crate::outcome::JobOutcome;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Metadata store kept in a map.
#[derive(Debug, Default)]
pub struct MemoryJobRepository {
    records: Mutex<HashMap<JobId, JobMetadataRecord>>,
}

impl MemoryJobRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, record: &JobMetadataRecord) -> JobResult<()> {
        let mut records = self.records.lock();
        if records.contains_key(&record.job_id) {
            return Err(JobError::Database(format!(
                "Duplicate job id: {}",
                record.job_id
            )));
        }
        records.insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, job_id: &JobId) -> JobResult<Option<JobMetadataRecord>> {
        Ok(self.records.lock().get(job_id).cloned())
    }

    async fn find_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> JobResult<Vec<JobMetadataRecord>> {
        let mut found: Vec<JobMetadataRecord> = self
            .records
            .lock()
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> JobResult<()> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        record.apply_status(status, error_message, Utc::now());
        Ok(())
    }

    async fn transition_status(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        status: JobStatus,
    ) -> JobResult<bool> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if !expected.contains(&record.status) {
            return Ok(false);
        }
        record.apply_status(status, None, Utc::now());
        Ok(true)
    }

    async fn increment_attempts(&self, job_id: &JobId) -> JobResult<u32> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        record.attempts += 1;
        record.updated_at = Utc::now();
        Ok(record.attempts)
    }

    async fn record_result(&self, job_id: &JobId, outcome: &JobOutcome) -> JobResult<()> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        record.result = Some(outcome.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn count_by_status(&self) -> JobResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for record in self.records.lock().values() {
            counts.add(record.status, 1);
        }
        Ok(counts)
    }

    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}
