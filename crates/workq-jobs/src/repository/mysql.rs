//! MySQL metadata store.
//!
//! Expects the `workq_jobs` table from `sql/workq_jobs.sql`.

use super::{JobMetadataRecord, JobRepository, StatusCounts};
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobPayload, JobStatus};
use crate::outcome::JobOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, warn};
use workq_config::DatabaseConfig;

/// Connects a MySQL pool from configuration.
pub async fn connect_pool(config: &DatabaseConfig) -> JobResult<MySqlPool> {
    info!("Connecting to MySQL database...");

    let pool = MySqlPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        .connect(&config.url)
        .await
        .map_err(|e| {
            warn!("Failed to connect to database: {}", e);
            JobError::Database(format!("Failed to connect: {e}"))
        })?;

    info!("MySQL connection pool established");
    Ok(pool)
}

const SELECT_COLUMNS: &str = r#"
    SELECT job_id, job_type, queue_name, status, priority, attempts, max_attempts,
           timeout_secs, payload, result, error_message,
           created_at, updated_at, processed_at, failed_at
    FROM workq_jobs
"#;

/// MySQL job metadata repository.
#[derive(Debug, Clone)]
pub struct MySqlJobRepository {
    pool: MySqlPool,
}

impl MySqlJobRepository {
    /// Creates a new repository over a pool.
    #[must_use]
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn exists(&self, job_id: &JobId) -> JobResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM workq_jobs WHERE job_id = ? LIMIT 1")
                .bind(job_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

/// Database row representation of a job.
#[derive(Debug, FromRow)]
struct JobRow {
    job_id: String,
    job_type: String,
    queue_name: String,
    status: String,
    priority: i32,
    attempts: u32,
    max_attempts: u32,
    timeout_secs: u64,
    payload: String,
    result: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobMetadataRecord {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let payload: JobPayload = serde_json::from_str(&row.payload)?;
        let result = row
            .result
            .as_deref()
            .map(JobOutcome::from_storage)
            .transpose()?;

        Ok(JobMetadataRecord {
            job_id: JobId::from(row.job_id),
            job_type: row.job_type,
            queue_name: row.queue_name,
            status: row.status.parse()?,
            priority: row.priority,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            timeout_secs: row.timeout_secs,
            payload,
            result,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
            failed_at: row.failed_at,
        })
    }
}

#[async_trait]
impl JobRepository for MySqlJobRepository {
    async fn insert(&self, record: &JobMetadataRecord) -> JobResult<()> {
        debug!(job_id = %record.job_id, "Inserting job record");

        let payload = serde_json::to_string(&record.payload)?;
        let result = record.result.as_ref().map(JobOutcome::to_storage).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO workq_jobs (
                job_id, job_type, queue_name, status, priority, attempts, max_attempts,
                timeout_secs, payload, result, error_message,
                created_at, updated_at, processed_at, failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(&record.job_type)
        .bind(&record.queue_name)
        .bind(record.status.as_str())
        .bind(record.priority)
        .bind(record.attempts)
        .bind(record.max_attempts)
        .bind(record.timeout_secs)
        .bind(payload)
        .bind(result)
        .bind(&record.error_message)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.processed_at)
        .bind(record.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, job_id: &JobId) -> JobResult<Option<JobMetadataRecord>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{SELECT_COLUMNS} WHERE job_id = ?"))
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobMetadataRecord::try_from).transpose()
    }

    async fn find_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> JobResult<Vec<JobMetadataRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = ? ORDER BY created_at, job_id LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(u64::try_from(limit).unwrap_or(u64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobMetadataRecord::try_from).collect()
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> JobResult<()> {
        debug!(job_id = %job_id, status = %status, "Updating job status");

        let now = Utc::now();
        let processed_at = (status == JobStatus::Completed).then_some(now);
        let failed_at = (status == JobStatus::Failed).then_some(now);

        let updated = sqlx::query(
            r#"
            UPDATE workq_jobs
            SET status = ?,
                updated_at = ?,
                processed_at = COALESCE(?, processed_at),
                failed_at = COALESCE(?, failed_at),
                error_message = COALESCE(?, error_message)
            WHERE job_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(processed_at)
        .bind(failed_at)
        .bind(error_message)
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 && !self.exists(job_id).await? {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn transition_status(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        status: JobStatus,
    ) -> JobResult<bool> {
        if expected.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            "UPDATE workq_jobs SET status = ?, updated_at = ? WHERE job_id = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(job_id.as_str());
        for current in expected {
            query = query.bind(current.as_str());
        }

        let updated = query.execute(&self.pool).await?;
        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        if self.exists(job_id).await? {
            Ok(false)
        } else {
            Err(JobError::NotFound(job_id.to_string()))
        }
    }

    async fn increment_attempts(&self, job_id: &JobId) -> JobResult<u32> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE workq_jobs SET attempts = attempts + 1, updated_at = ? WHERE job_id = ?",
        )
        .bind(Utc::now())
        .bind(job_id.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(JobError::NotFound(job_id.to_string()));
        }

        let attempts: u32 = sqlx::query_scalar("SELECT attempts FROM workq_jobs WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(attempts)
    }

    async fn record_result(&self, job_id: &JobId, outcome: &JobOutcome) -> JobResult<()> {
        let updated = sqlx::query("UPDATE workq_jobs SET result = ?, updated_at = ? WHERE job_id = ?")
            .bind(outcome.to_storage()?)
            .bind(Utc::now())
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 && !self.exists(job_id).await? {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn count_by_status(&self) -> JobResult<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM workq_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.parse::<JobStatus>() {
                Ok(status) => counts.add(status, u64::try_from(count).unwrap_or(0)),
                Err(_) => warn!(status = %status, "Ignoring unknown job status in counts"),
            }
        }
        Ok(counts)
    }

    async fn health_check(&self) -> JobResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| JobError::Database(format!("Health check failed: {e}")))?;
        Ok(())
    }
}
