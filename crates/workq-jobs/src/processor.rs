//! Job execution harness and its retry/failure state machine.

use crate::context::QueueContext;
use crate::error::JobError;
use crate::events::JobEvent;
use crate::job::{FailureCause, Job, JobContext, JobId, JobStatus};
use crate::metrics::JobMetrics;
use crate::outcome::JobOutcome;
use crate::queue::{QueueEntry, QueueStore};
use crate::resources::{ResourceGuard, ResourceLimits, StopReason};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// One processed job in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedJob {
    pub job_id: JobId,
    pub job_type: String,
    pub queue: String,
    pub outcome: JobOutcome,
}

/// Result of one `process_jobs` run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// Jobs handled, whatever their outcome.
    pub processed: usize,
    /// Jobs whose outcome was unsuccessful.
    pub failed: usize,
    /// Wall time of the batch.
    pub elapsed: Duration,
    /// Per-job outcomes in dequeue order.
    pub results: Vec<ProcessedJob>,
    pub stop_reason: StopReason,
    /// Dequeue error that ended the batch, when `stop_reason` is
    /// `StoreUnavailable`.
    pub store_error: Option<String>,
}

impl BatchReport {
    /// Jobs that completed successfully.
    pub fn completed(&self) -> usize {
        self.processed - self.failed
    }
}

/// Runs dequeued jobs and drives their lifecycle.
#[derive(Debug)]
pub struct JobProcessor {
    ctx: QueueContext,
    queue: QueueStore,
    limits: ResourceLimits,
    current_job: Mutex<Option<JobId>>,
    guard: Mutex<Option<ResourceGuard>>,
}

impl JobProcessor {
    /// Creates a processor with the given batch ceilings.
    pub fn new(ctx: QueueContext, limits: ResourceLimits) -> Self {
        Self {
            queue: QueueStore::new(ctx.clone()),
            ctx,
            limits,
            current_job: Mutex::new(None),
            guard: Mutex::new(None),
        }
    }

    /// The queue this processor drains.
    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// Job currently executing, if any.
    pub fn current_job(&self) -> Option<JobId> {
        self.current_job.lock().clone()
    }

    /// Returns the ceiling that has tripped, if any.
    ///
    /// Outside a batch only the memory ceiling can trip.
    pub fn resource_stop(&self) -> Option<StopReason> {
        let guard = self.guard.lock().clone();
        guard
            .unwrap_or_else(|| {
                ResourceGuard::start(self.limits.clone(), self.ctx.memory_probe().clone())
            })
            .check()
    }

    /// Executes one dequeued entry and records the result.
    ///
    /// Never fails: rebuild errors, panics, timeouts and store errors all
    /// end up in the returned outcome or the log.
    pub async fn process_job(&self, entry: QueueEntry) -> JobOutcome {
        let span = info_span!(
            "job",
            job_id = %entry.job_id,
            job_type = %entry.job_type,
            queue = %entry.queue_name
        );

        *self.current_job.lock() = Some(entry.job_id.clone());
        let outcome = self.run(entry).instrument(span).await;
        *self.current_job.lock() = None;
        outcome
    }

    async fn run(&self, entry: QueueEntry) -> JobOutcome {
        let started = Instant::now();

        let job = match self.ctx.registry().build(entry.job.clone()) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Could not rebuild job from its entry");
                return self.fail_unbuildable(&entry, e, started.elapsed()).await;
            }
        };

        let attempt = match self.ctx.repository().increment_attempts(&entry.job_id).await {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(error = %e, "Could not record job attempt, releasing job");
                self.release(&entry).await;
                let mut outcome = JobOutcome::failure(e.to_string(), Some(e.error_code()));
                outcome.record_metrics(started.elapsed(), 0);
                self.ctx.events().emit(JobEvent::Processed {
                    job_id: entry.job_id.clone(),
                    job_type: entry.job_type.clone(),
                    successful: false,
                });
                return outcome;
            }
        };

        let job_ctx = JobContext {
            job_id: entry.job_id.clone(),
            attempt,
            max_attempts: job.retry_attempts(),
            queue: entry.queue_name.clone(),
            services: self.ctx.services().clone(),
        };

        debug!(attempt, max_attempts = job_ctx.max_attempts, "Executing job");

        let memory_before = self.ctx.memory_probe().resident_bytes();
        let result = execute_guarded(job.as_ref(), &job_ctx).await;
        let memory_after = self.ctx.memory_probe().resident_bytes();
        let elapsed = started.elapsed();
        let memory_delta = match (memory_before, memory_after) {
            (Some(before), Some(after)) => after.saturating_sub(before),
            _ => 0,
        };

        let (mut outcome, cause) = match result {
            Ok(outcome) if outcome.successful => (outcome, None),
            Ok(outcome) => {
                let cause = FailureCause::from_outcome(&outcome);
                (outcome, Some(cause))
            }
            Err(e) => (
                JobOutcome::failure(e.to_string(), Some(e.error_code())),
                Some(FailureCause::Thrown(e)),
            ),
        };
        outcome.record_metrics(elapsed, memory_delta);

        match cause {
            None => self.complete(&entry, &outcome).await,
            Some(cause) => self.handle_failure(&entry, job.as_ref(), &outcome, cause).await,
        }

        self.ctx.events().emit(JobEvent::Processed {
            job_id: entry.job_id.clone(),
            job_type: entry.job_type.clone(),
            successful: outcome.successful,
        });
        outcome
    }

    async fn complete(&self, entry: &QueueEntry, outcome: &JobOutcome) {
        let repository = self.ctx.repository();
        if let Err(e) = repository.record_result(&entry.job_id, outcome).await {
            error!(error = %e, "Failed to store job result");
        }
        if let Err(e) = repository
            .update_status(&entry.job_id, JobStatus::Completed, None)
            .await
        {
            error!(error = %e, "Failed to mark job completed");
        }

        JobMetrics::job_completed(
            &entry.queue_name,
            &entry.job_type,
            Duration::from_secs_f64(outcome.execution_time),
        );
        self.ctx.events().emit(JobEvent::Completed {
            job_id: entry.job_id.clone(),
            job_type: entry.job_type.clone(),
            execution_time: outcome.execution_time,
        });
        info!(execution_time = outcome.execution_time, "Job completed");
    }

    async fn handle_failure(
        &self,
        entry: &QueueEntry,
        job: &dyn Job,
        outcome: &JobOutcome,
        cause: FailureCause,
    ) {
        let repository = self.ctx.repository();
        if let Err(e) = repository.record_result(&entry.job_id, outcome).await {
            error!(error = %e, "Failed to store job result");
        }

        // Read back the durable counters; they are what the retry decision uses
        let (attempts, max_attempts) = match repository.find_by_id(&entry.job_id).await {
            Ok(Some(record)) => (record.attempts, record.max_attempts),
            Ok(None) => (job.retry_attempts(), job.retry_attempts()),
            Err(e) => {
                error!(error = %e, "Failed to read job record after failure");
                (job.retry_attempts(), job.retry_attempts())
            }
        };

        if attempts < max_attempts && job.should_retry(&cause, attempts) {
            let delay = job.retry_delay(attempts);
            match self.queue.requeue(entry, delay).await {
                Ok(()) => {
                    JobMetrics::job_retried(&entry.queue_name, &entry.job_type, attempts);
                    self.ctx.events().emit(JobEvent::Retried {
                        job_id: entry.job_id.clone(),
                        attempt: attempts,
                        delay_secs: delay.as_secs(),
                    });
                    warn!(
                        attempt = attempts,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %cause,
                        "Job failed, retry scheduled"
                    );
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Could not schedule retry, failing job");
                }
            }
        }

        let message = cause.message();
        if let Err(e) = repository
            .update_status(&entry.job_id, JobStatus::Failed, Some(&message))
            .await
        {
            error!(error = %e, "Failed to mark job failed");
        }
        job.handle_failure(&cause, attempts);

        JobMetrics::job_failed(
            &entry.queue_name,
            &entry.job_type,
            cause.error_code(),
            Duration::from_secs_f64(outcome.execution_time),
        );
        self.ctx.events().emit(JobEvent::Failed {
            job_id: entry.job_id.clone(),
            attempt: attempts,
            error: message,
        });
        warn!(attempt = attempts, max_attempts, error = %cause, "Job failed permanently");
    }

    /// Puts a claimed entry back, unexecuted, for the next dequeue.
    async fn release(&self, entry: &QueueEntry) {
        if let Err(e) = self.queue.requeue(entry, Duration::ZERO).await {
            error!(error = %e, "Could not release job, it stays in processing");
        }
    }

    /// Terminal path for an entry that names no buildable job.
    async fn fail_unbuildable(
        &self,
        entry: &QueueEntry,
        err: JobError,
        elapsed: Duration,
    ) -> JobOutcome {
        let message = err.to_string();
        let mut outcome = JobOutcome::failure(&message, Some(err.error_code()));
        outcome.record_metrics(elapsed, 0);

        let repository = self.ctx.repository();
        if let Err(e) = repository.record_result(&entry.job_id, &outcome).await {
            error!(error = %e, "Failed to store job result");
        }
        if let Err(e) = repository
            .update_status(&entry.job_id, JobStatus::Failed, Some(&message))
            .await
        {
            error!(error = %e, "Failed to mark job failed");
        }

        JobMetrics::job_failed(&entry.queue_name, &entry.job_type, err.error_code(), elapsed);
        self.ctx.events().emit(JobEvent::Failed {
            job_id: entry.job_id.clone(),
            attempt: 0,
            error: message,
        });
        self.ctx.events().emit(JobEvent::Processed {
            job_id: entry.job_id.clone(),
            job_type: entry.job_type.clone(),
            successful: false,
        });
        outcome
    }

    /// Dequeues and processes until `max_jobs`, an empty queue, a tripped
    /// ceiling, or an unreachable store.
    pub async fn process_jobs(&self, queue_names: &[&str], max_jobs: usize) -> BatchReport {
        let guard = ResourceGuard::start(self.limits.clone(), self.ctx.memory_probe().clone());
        *self.guard.lock() = Some(guard.clone());

        self.ctx.events().emit(JobEvent::BatchStarted {
            queues: queue_names.iter().map(|q| (*q).to_string()).collect(),
            max_jobs,
        });

        let mut results = Vec::new();
        let mut failed = 0;
        let mut store_error = None;

        let stop_reason = loop {
            if results.len() >= max_jobs {
                break StopReason::MaxJobs;
            }
            if let Some(reason) = guard.check() {
                warn!(
                    reason = %reason,
                    processed = results.len(),
                    "Resource ceiling reached, stopping batch early"
                );
                break reason;
            }

            let entry = match self.queue.dequeue(queue_names).await {
                Ok(Some(entry)) => entry,
                Ok(None) => break StopReason::QueueEmpty,
                Err(e) => {
                    error!(error = %e, "Dequeue failed, stopping batch");
                    store_error = Some(e.to_string());
                    break StopReason::StoreUnavailable;
                }
            };

            let job_id = entry.job_id.clone();
            let job_type = entry.job_type.clone();
            let queue = entry.queue_name.clone();
            let outcome = self.process_job(entry).await;
            if !outcome.successful {
                failed += 1;
            }
            results.push(ProcessedJob {
                job_id,
                job_type,
                queue,
                outcome,
            });
        };

        *self.guard.lock() = None;

        let report = BatchReport {
            processed: results.len(),
            failed,
            elapsed: guard.elapsed(),
            results,
            stop_reason,
            store_error,
        };

        JobMetrics::batch_finished(&stop_reason.to_string(), report.elapsed);
        self.ctx.events().emit(JobEvent::BatchCompleted {
            processed: report.processed,
            failed: report.failed,
            stop_reason,
        });
        debug!(
            processed = report.processed,
            failed = report.failed,
            stop_reason = %stop_reason,
            "Batch finished"
        );

        report
    }
}

/// Runs `execute()` under the job's timeout, turning panics into errors.
async fn execute_guarded(job: &dyn Job, ctx: &JobContext) -> Result<JobOutcome, JobError> {
    let budget = job.timeout();
    match timeout(budget, AssertUnwindSafe(job.execute(ctx)).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
        Err(_) => Err(JobError::Timeout(budget.as_secs())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
