//! Lifecycle events and the bus collaborators subscribe to.

use crate::job::JobId;
use crate::resources::StopReason;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Named lifecycle event emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A job was accepted by the queue.
    Enqueued {
        job_id: JobId,
        job_type: String,
        queue: String,
        delay_secs: u64,
    },
    /// A job was claimed by a worker.
    Dequeued { job_id: JobId, queue: String },
    /// A job finished one execution attempt, whatever its result.
    Processed {
        job_id: JobId,
        job_type: String,
        successful: bool,
    },
    /// A job completed successfully.
    Completed {
        job_id: JobId,
        job_type: String,
        execution_time: f64,
    },
    /// A failed job was scheduled for another attempt.
    Retried {
        job_id: JobId,
        attempt: u32,
        delay_secs: u64,
    },
    /// A job failed permanently.
    Failed {
        job_id: JobId,
        attempt: u32,
        error: String,
    },
    /// A batch is starting.
    BatchStarted { queues: Vec<String>, max_jobs: usize },
    /// A batch returned.
    BatchCompleted {
        processed: usize,
        failed: usize,
        stop_reason: StopReason,
    },
    /// A worker run started.
    WorkerStarted { worker_id: String },
    /// A worker run finished.
    WorkerCompleted { worker_id: String, processed: usize },
    /// A worker run could not proceed.
    WorkerError { worker_id: String, error: String },
}

impl JobEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Enqueued { .. } => "job_enqueued",
            JobEvent::Dequeued { .. } => "job_dequeued",
            JobEvent::Processed { .. } => "job_processed",
            JobEvent::Completed { .. } => "job_completed",
            JobEvent::Retried { .. } => "job_retried",
            JobEvent::Failed { .. } => "job_failed",
            JobEvent::BatchStarted { .. } => "batch_started",
            JobEvent::BatchCompleted { .. } => "batch_completed",
            JobEvent::WorkerStarted { .. } => "worker_started",
            JobEvent::WorkerCompleted { .. } => "worker_completed",
            JobEvent::WorkerError { .. } => "worker_error",
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

/// Synchronous observer registry.
///
/// Listeners run on the emitting task, in subscription order. The engine
/// works the same with no listeners at all.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for every event.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Delivers an event to every listener.
    ///
    /// A panicking listener is logged and skipped.
    pub fn emit(&self, event: JobEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = event.name(), "Event listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
