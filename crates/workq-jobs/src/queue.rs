//! Priority and delayed queue over the sorted-set store.

use crate::context::QueueContext;
use crate::error::{JobError, JobResult};
use crate::events::JobEvent;
use crate::job::{Job, JobId, JobRecord, JobStatus};
use crate::metrics::JobMetrics;
use crate::repository::{JobMetadataRecord, StatusCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stored form of one queued job; the sorted-set member.
///
/// `job_id` is serialized first so equal-priority members order by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub job_type: String,
    pub queue_name: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub job: JobRecord,
}

impl QueueEntry {
    /// Wraps a job record under a fresh id.
    pub fn new(record: JobRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::new(),
            job_type: record.job_type.clone(),
            queue_name: record.settings.queue_name.clone(),
            priority: record.settings.priority,
            created_at,
            job: record,
        }
    }

    /// Encodes the entry as a sorted-set member.
    pub fn to_member(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a sorted-set member.
    pub fn from_member(member: &str) -> JobResult<Self> {
        serde_json::from_str(member).map_err(|e| JobError::MalformedEntry(e.to_string()))
    }
}

/// Pending counts per queue plus durable counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Pending entries per queue.
    pub queues: BTreeMap<String, u64>,
    /// Entries waiting in the delayed set.
    pub delayed: u64,
    /// Durable records per status.
    pub jobs: StatusCounts,
}

impl QueueStats {
    /// Pending entries across the reported queues.
    pub fn total_pending(&self) -> u64 {
        self.queues.values().sum()
    }
}

/// Priority/delayed job queue.
#[derive(Debug, Clone)]
pub struct QueueStore {
    ctx: QueueContext,
}

impl QueueStore {
    /// Creates a queue over a context.
    pub fn new(ctx: QueueContext) -> Self {
        Self { ctx }
    }

    /// The context this queue runs on.
    pub fn context(&self) -> &QueueContext {
        &self.ctx
    }

    /// Returns true if the store answers a ping.
    pub async fn is_connected(&self) -> bool {
        self.ctx.store().ping().await.is_ok()
    }

    /// Re-establishes the store connection.
    pub async fn reconnect(&self) -> JobResult<()> {
        self.ctx.store().reconnect().await?;
        info!("Queue store reconnected");
        Ok(())
    }

    /// Enqueues a job, immediately or after `delay`.
    ///
    /// The durable record is written first. If the store write then fails,
    /// the record is marked failed so nothing stays queued without an entry.
    pub async fn enqueue(&self, job: &dyn Job, delay: Duration) -> JobResult<JobId> {
        let record = job.to_record()?;
        if !self.ctx.registry().contains(&record.job_type) {
            return Err(JobError::UnknownJobType(record.job_type));
        }

        self.ctx.store().ping().await?;

        let now = self.ctx.clock().now();
        let entry = QueueEntry::new(record, now);
        let member = entry.to_member()?;

        let metadata = JobMetadataRecord::queued(entry.job_id.clone(), &entry.job, now);
        self.ctx.repository().insert(&metadata).await?;

        let (key, score) = if delay.is_zero() {
            (self.ctx.keys().queue(&entry.queue_name), f64::from(entry.priority))
        } else {
            (
                self.ctx.keys().delayed(),
                self.ctx.clock().unix_seconds() + delay.as_secs_f64(),
            )
        };

        if let Err(e) = self.ctx.store().add(&key, &member, score).await {
            error!(job_id = %entry.job_id, error = %e, "Failed to add job to queue store");
            self.mark_failed(&entry.job_id, &format!("enqueue failed: {e}"))
                .await;
            return Err(e);
        }

        JobMetrics::job_enqueued(&entry.queue_name, &entry.job_type, !delay.is_zero());
        self.ctx.events().emit(JobEvent::Enqueued {
            job_id: entry.job_id.clone(),
            job_type: entry.job_type.clone(),
            queue: entry.queue_name.clone(),
            delay_secs: delay.as_secs(),
        });
        debug!(
            job_id = %entry.job_id,
            job_type = %entry.job_type,
            queue = %entry.queue_name,
            priority = entry.priority,
            delay_secs = delay.as_secs(),
            "Enqueued job"
        );

        Ok(entry.job_id)
    }

    /// Puts an entry back in the delayed set for another attempt.
    ///
    /// Keeps the job id; the record goes back to `queued` before the entry
    /// becomes visible.
    pub async fn requeue(&self, entry: &QueueEntry, delay: Duration) -> JobResult<()> {
        let member = entry.to_member()?;
        self.ctx
            .repository()
            .update_status(&entry.job_id, JobStatus::Queued, None)
            .await?;

        let ready_at = self.ctx.clock().unix_seconds() + delay.as_secs_f64();
        if let Err(e) = self
            .ctx
            .store()
            .add(&self.ctx.keys().delayed(), &member, ready_at)
            .await
        {
            error!(job_id = %entry.job_id, error = %e, "Failed to schedule retry");
            self.mark_failed(&entry.job_id, &format!("retry scheduling failed: {e}"))
                .await;
            return Err(e);
        }

        debug!(job_id = %entry.job_id, delay_secs = delay.as_secs(), "Scheduled job retry");
        Ok(())
    }

    /// Claims the most urgent ready entry from `queue_names`, tried in order.
    ///
    /// Due delayed entries are promoted first. Entries that cannot be decoded,
    /// name an unknown type, or whose record is missing or no longer queued
    /// are dropped and the next one is tried.
    pub async fn dequeue(&self, queue_names: &[&str]) -> JobResult<Option<QueueEntry>> {
        self.promote_delayed().await?;

        for queue in queue_names {
            let key = self.ctx.keys().queue(queue);
            while let Some((member, score)) = self.ctx.store().pop_min(&key).await? {
                if let Some(entry) = self.claim(queue, &key, &member, score).await? {
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    async fn promote_delayed(&self) -> JobResult<()> {
        let promotion = self
            .ctx
            .store()
            .promote_due(
                &self.ctx.keys().delayed(),
                &self.ctx.keys().queue_prefix(),
                self.ctx.clock().unix_seconds(),
                self.ctx.promotion_batch(),
            )
            .await?;

        if promotion.moved > 0 {
            JobMetrics::delayed_promoted(promotion.moved);
            debug!(count = promotion.moved, "Promoted delayed jobs");
        }
        if promotion.dropped > 0 {
            JobMetrics::entry_dropped("delayed", "malformed");
            warn!(count = promotion.dropped, "Dropped malformed delayed entries");
        }
        Ok(())
    }

    async fn claim(
        &self,
        queue: &str,
        key: &str,
        member: &str,
        score: f64,
    ) -> JobResult<Option<QueueEntry>> {
        let entry = match QueueEntry::from_member(member) {
            Ok(entry) => entry,
            Err(e) => {
                JobMetrics::entry_dropped(queue, "malformed");
                warn!(queue = %queue, error = %e, "Dropped malformed queue entry");
                return Ok(None);
            }
        };

        if entry.job_type.trim().is_empty() || !self.ctx.registry().contains(&entry.job_type) {
            JobMetrics::entry_dropped(queue, "unknown_type");
            warn!(
                job_id = %entry.job_id,
                job_type = %entry.job_type,
                "Dropped queue entry with unresolvable job type"
            );
            self.mark_failed(
                &entry.job_id,
                &format!("unresolvable job type '{}'", entry.job_type),
            )
            .await;
            return Ok(None);
        }

        // Only a queued record may be claimed; a cancel racing this call wins
        match self
            .ctx
            .repository()
            .transition_status(&entry.job_id, &[JobStatus::Queued], JobStatus::Processing)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                JobMetrics::entry_dropped(queue, "not_queued");
                info!(job_id = %entry.job_id, "Skipped job that is no longer queued");
                return Ok(None);
            }
            Err(JobError::NotFound(_)) => {
                JobMetrics::entry_dropped(queue, "missing_record");
                warn!(job_id = %entry.job_id, "Dropped queue entry without a job record");
                return Ok(None);
            }
            Err(e) => {
                self.restore(key, member, score).await;
                return Err(e);
            }
        }

        JobMetrics::job_dequeued(queue, &entry.job_type);
        self.ctx.events().emit(JobEvent::Dequeued {
            job_id: entry.job_id.clone(),
            queue: queue.to_string(),
        });
        debug!(
            job_id = %entry.job_id,
            job_type = %entry.job_type,
            queue = %queue,
            "Dequeued job"
        );

        Ok(Some(entry))
    }

    /// Puts a popped member back after the metadata store failed.
    async fn restore(&self, key: &str, member: &str, score: f64) {
        if let Err(e) = self.ctx.store().add(key, member, score).await {
            error!(key = %key, error = %e, "Failed to restore popped queue entry");
        }
    }

    async fn mark_failed(&self, job_id: &JobId, message: &str) {
        match self
            .ctx
            .repository()
            .update_status(job_id, JobStatus::Failed, Some(message))
            .await
        {
            Ok(()) | Err(JobError::NotFound(_)) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark job failed"),
        }
    }

    /// Pending counts for one queue, or every queue, plus durable counts.
    pub async fn get_queue_stats(&self, queue_name: Option<&str>) -> JobResult<QueueStats> {
        let keys = self.ctx.keys();
        let store = self.ctx.store();

        let names: Vec<String> = match queue_name {
            Some(name) => vec![name.to_string()],
            None => store
                .keys(&keys.queue_pattern())
                .await?
                .iter()
                .filter_map(|key| keys.queue_name(key).map(str::to_string))
                .collect(),
        };

        let mut stats = QueueStats::default();
        for name in names {
            let pending = store.cardinality(&keys.queue(&name)).await?;
            JobMetrics::set_pending(&name, pending);
            stats.queues.insert(name, pending);
        }

        stats.delayed = store.cardinality(&keys.delayed()).await?;
        JobMetrics::set_delayed(stats.delayed);

        stats.jobs = self.ctx.repository().count_by_status().await?;
        Ok(stats)
    }

    /// Deletes every pending entry of a queue. Durable records are left alone.
    pub async fn clear_queue(&self, queue_name: &str) -> JobResult<bool> {
        let cleared = self
            .ctx
            .store()
            .delete(&self.ctx.keys().queue(queue_name))
            .await?;
        info!(queue = %queue_name, cleared, "Cleared queue");
        Ok(cleared)
    }

    /// Sets a job's durable status.
    pub async fn update_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> JobResult<()> {
        self.ctx
            .repository()
            .update_status(job_id, status, error_message)
            .await
    }

    /// Cancels a job that is queued or failed.
    ///
    /// A cancelled job's entry is dropped when a worker pops it.
    pub async fn cancel_job(&self, job_id: &JobId) -> JobResult<()> {
        let repository = self.ctx.repository();
        let allowed = [JobStatus::Queued, JobStatus::Failed];

        if repository
            .transition_status(job_id, &allowed, JobStatus::Cancelled)
            .await?
        {
            info!(job_id = %job_id, "Cancelled job");
            return Ok(());
        }

        let actual = repository
            .find_by_id(job_id)
            .await?
            .map_or_else(|| "missing".to_string(), |r| r.status.to_string());
        Err(JobError::InvalidState {
            expected: "queued or failed".to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPayload, JobSettings};

    #[test]
    fn test_entry_member_starts_with_job_id() {
        let record = JobRecord {
            job_type: "email".into(),
            payload: JobPayload::new(),
            settings: JobSettings::default(),
        };
        let entry = QueueEntry::new(record, Utc::now());
        let member = entry.to_member().unwrap();
        assert!(member.starts_with(r#"{"job_id":"#));
        assert_eq!(QueueEntry::from_member(&member).unwrap(), entry);
    }

    #[test]
    fn test_entries_with_same_payload_get_distinct_members() {
        let record = JobRecord {
            job_type: "email".into(),
            payload: JobPayload::new(),
            settings: JobSettings::default(),
        };
        let now = Utc::now();
        let a = QueueEntry::new(record.clone(), now).to_member().unwrap();
        let b = QueueEntry::new(record, now).to_member().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_member_rejects_garbage() {
        assert!(matches!(
            QueueEntry::from_member("{not json"),
            Err(JobError::MalformedEntry(_))
        ));
    }
}
