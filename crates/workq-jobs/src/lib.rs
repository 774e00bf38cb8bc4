//! Workq Jobs - Priority and Delayed Job Queue Engine
//!
//! A job queue built on nothing more than ordered-set primitives:
//! - Per-queue sorted sets scored by priority (lower runs first)
//! - One shared delayed set scored by ready-at time, promoted on dequeue
//! - Atomic pop-and-remove dequeue, safe across concurrent workers
//! - Durable job metadata records tracking the lifecycle
//! - Retry with per-attempt backoff and overridable retry decisions
//! - Bounded batch worker with memory and wall-time ceilings
//!
//! # Architecture
//!
//! ```text
//! Producer
//!    │ enqueue(job, delay)
//!    ▼
//! ┌──────────────────────── Sorted-set store ────────────────────────┐
//! │  {p}:queue:email   {p}:queue:images   {p}:queue:default   ...    │
//! │          ▲                                                        │
//! │          │ promote when ready_at <= now                           │
//! │  {p}:delayed  (score = ready_at)                                  │
//! └───────────────────────────────┬───────────────────────────────────┘
//!                                 │ dequeue (ZPOPMIN)
//!                                 ▼
//!   BatchWorker ──► JobProcessor ──► Job::execute ──► JobOutcome
//!                        │
//!                        ├─ success ─► completed
//!                        ├─ retry ───► delayed set (score = now + backoff)
//!                        └─ give up ─► failed
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use workq_jobs::prelude::*;
//! use workq_jobs::{register_builtin_jobs, EmailJob, MemoryJobRepository, MemoryStore};
//!
//! let ctx = QueueContext::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .repository(Arc::new(MemoryJobRepository::new()))
//!     .build()?;
//! register_builtin_jobs(ctx.registry());
//!
//! let queue = QueueStore::new(ctx.clone());
//! let job = EmailJob::to("user@example.com", "Welcome!", "Hello...")?.with_priority(5);
//! queue.enqueue(&job, Duration::ZERO).await?;
//!
//! let worker = BatchWorker::new(ctx, ResourceLimits::default());
//! let report = worker.process_jobs(&["email"], 10).await?;
//! ```

pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod job;
pub mod jobs;
pub mod metrics;
pub mod outcome;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod repository;
pub mod resources;
pub mod retry;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{QueueContext, QueueContextBuilder, DEFAULT_PROMOTION_BATCH};
pub use error::{JobError, JobResult};
pub use events::{EventBus, JobEvent, SubscriptionId};
pub use job::{
    payload_from, FailureCause, Job, JobContext, JobDefinition, JobId, JobPayload, JobRecord,
    JobSettings, JobStatus,
};
pub use jobs::{
    register_builtin_jobs, ApiClient, ApiRequest, ApiResponse, ApiSyncJob, ApiSyncPayload,
    EmailJob, EmailPayload, HttpMethod, ImageOperation, ImageOutput, ImagePayload,
    ImageProcessingJob, ImageTransformer, JobServices, MailMessage, MailTransport,
};
pub use metrics::{register_metrics, JobMetrics};
pub use outcome::JobOutcome;
pub use processor::{BatchReport, JobProcessor, ProcessedJob};
pub use queue::{QueueEntry, QueueStats, QueueStore};
pub use registry::JobRegistry;
pub use repository::{
    connect_pool, JobMetadataRecord, JobRepository, MemoryJobRepository, MySqlJobRepository,
    StatusCounts,
};
pub use resources::{
    FixedMemoryProbe, MemoryProbe, ProcMemoryProbe, ResourceGuard, ResourceLimits, StopReason,
};
pub use retry::{default_should_retry, RetryPolicy};
pub use store::{create_pool, MemoryStore, Promotion, QueueKeys, RedisStore, SortedSetStore};
pub use worker::{BatchWorker, WorkerState, WorkerStats, WorkerStatus};

/// Re-export commonly used traits and types
pub mod prelude {
    pub use crate::job::{FailureCause, Job, JobDefinition, JobStatus};
    pub use crate::outcome::JobOutcome;
    pub use crate::queue::QueueStore;
    pub use crate::resources::ResourceLimits;
    pub use crate::worker::BatchWorker;
    pub use crate::{JobContext, JobError, JobId, JobResult, QueueContext};
}
