//! Batch worker: bounded runs of the processor plus running statistics.

use crate::context::QueueContext;
use crate::error::JobResult;
use crate::events::JobEvent;
use crate::job::JobId;
use crate::processor::{BatchReport, JobProcessor};
use crate::resources::{ResourceLimits, StopReason};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Working,
    Error,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Working => "working",
            WorkerState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Statistics accumulated across batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub jobs_completed: u64,
    /// Cumulative wall time spent in batches.
    pub total_time: Duration,
    pub batches: u64,
}

impl WorkerStats {
    fn record(&mut self, report: &BatchReport) {
        self.jobs_processed += report.processed as u64;
        self.jobs_failed += report.failed as u64;
        self.jobs_completed += report.completed() as u64;
        self.total_time += report.elapsed;
        self.batches += 1;
    }

    /// Throughput over the cumulative batch time.
    pub fn jobs_per_second(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            self.jobs_processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Completed over processed, in `0.0..=1.0`.
    pub fn success_rate(&self) -> f64 {
        if self.jobs_processed == 0 {
            0.0
        } else {
            self.jobs_completed as f64 / self.jobs_processed as f64
        }
    }
}

/// Snapshot returned by [`BatchWorker::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub uptime: Duration,
    pub connected: bool,
    pub current_job: Option<JobId>,
    pub last_error: Option<String>,
    pub stats: WorkerStats,
}

#[derive(Debug)]
struct WorkerInner {
    state: WorkerState,
    last_error: Option<String>,
    stats: WorkerStats,
}

/// Drives the processor one bounded batch at a time.
///
/// There is no background loop here; the host calls
/// [`BatchWorker::process_jobs`] as often as it likes.
#[derive(Debug)]
pub struct BatchWorker {
    id: String,
    ctx: QueueContext,
    processor: JobProcessor,
    started_at: Instant,
    inner: Mutex<WorkerInner>,
}

impl BatchWorker {
    /// Creates an idle worker.
    pub fn new(ctx: QueueContext, limits: ResourceLimits) -> Self {
        Self {
            id: format!("worker-{}", Uuid::now_v7()),
            processor: JobProcessor::new(ctx.clone(), limits),
            ctx,
            started_at: Instant::now(),
            inner: Mutex::new(WorkerInner {
                state: WorkerState::Idle,
                last_error: None,
                stats: WorkerStats::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn processor(&self) -> &JobProcessor {
        &self.processor
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// Runs one batch over `queue_names`.
    ///
    /// Fails with `NotConnected` without touching any queue when the store is
    /// unreachable. A batch cut short by a dequeue error still returns its
    /// report but leaves the worker in `Error`.
    pub async fn process_jobs(
        &self,
        queue_names: &[&str],
        max_jobs: usize,
    ) -> JobResult<BatchReport> {
        if let Err(err) = self.ctx.store().ping().await {
            self.fail(err.to_string());
            return Err(err);
        }

        {
            let mut inner = self.inner.lock();
            inner.state = WorkerState::Working;
        }
        self.ctx.events().emit(JobEvent::WorkerStarted {
            worker_id: self.id.clone(),
        });
        info!(worker_id = %self.id, queues = ?queue_names, max_jobs, "Worker batch starting");

        let report = self.processor.process_jobs(queue_names, max_jobs).await;
        self.inner.lock().stats.record(&report);

        if report.stop_reason == StopReason::StoreUnavailable {
            let message = report
                .store_error
                .clone()
                .unwrap_or_else(|| "store unavailable".to_string());
            self.fail(message);
            return Ok(report);
        }

        {
            let mut inner = self.inner.lock();
            inner.state = WorkerState::Idle;
            inner.last_error = None;
        }
        self.ctx.events().emit(JobEvent::WorkerCompleted {
            worker_id: self.id.clone(),
            processed: report.processed,
        });
        info!(
            worker_id = %self.id,
            processed = report.processed,
            failed = report.failed,
            stop_reason = %report.stop_reason,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Worker batch finished"
        );

        Ok(report)
    }

    fn fail(&self, message: String) {
        error!(worker_id = %self.id, error = %message, "Worker lost its store");
        {
            let mut inner = self.inner.lock();
            inner.state = WorkerState::Error;
            inner.last_error = Some(message.clone());
        }
        self.ctx.events().emit(JobEvent::WorkerError {
            worker_id: self.id.clone(),
            error: message,
        });
    }

    /// True once a resource ceiling has tripped.
    pub fn should_stop(&self) -> bool {
        self.processor.resource_stop().is_some()
    }

    /// Current state, connectivity and statistics.
    pub async fn get_status(&self) -> WorkerStatus {
        let connected = self.processor.queue().is_connected().await;
        let inner = self.inner.lock();
        WorkerStatus {
            worker_id: self.id.clone(),
            state: inner.state,
            uptime: self.started_at.elapsed(),
            connected,
            current_job: self.processor.current_job(),
            last_error: inner.last_error.clone(),
            stats: inner.stats.clone(),
        }
    }

    /// Accumulated statistics.
    pub fn stats(&self) -> WorkerStats {
        self.inner.lock().stats.clone()
    }
}
