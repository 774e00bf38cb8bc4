//! Explicit dependency context shared by the queue, processor and worker.

use crate::clock::{Clock, SystemClock};
use crate::error::{JobError, JobResult};
use crate::events::EventBus;
use crate::jobs::JobServices;
use crate::registry::JobRegistry;
use crate::repository::JobRepository;
use crate::resources::{MemoryProbe, ProcMemoryProbe};
use crate::store::{QueueKeys, SortedSetStore};
use std::sync::Arc;

/// Default number of delayed entries promoted per dequeue.
pub const DEFAULT_PROMOTION_BATCH: usize = 100;

/// Handles every engine component needs.
///
/// Cheap to clone; build one per process with [`QueueContext::builder`] and
/// pass it to constructors.
#[derive(Clone, Debug)]
pub struct QueueContext {
    store: Arc<dyn SortedSetStore>,
    repository: Arc<dyn JobRepository>,
    registry: Arc<JobRegistry>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    memory_probe: Arc<dyn MemoryProbe>,
    services: Arc<JobServices>,
    keys: QueueKeys,
    promotion_batch: usize,
}

impl QueueContext {
    /// Starts a builder.
    pub fn builder() -> QueueContextBuilder {
        QueueContextBuilder::default()
    }

    pub fn store(&self) -> &Arc<dyn SortedSetStore> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn memory_probe(&self) -> &Arc<dyn MemoryProbe> {
        &self.memory_probe
    }

    pub fn services(&self) -> &Arc<JobServices> {
        &self.services
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Maximum delayed entries moved per dequeue.
    pub fn promotion_batch(&self) -> usize {
        self.promotion_batch
    }
}

/// Builder for [`QueueContext`].
///
/// Store and repository are required; everything else has a default.
#[derive(Default)]
pub struct QueueContextBuilder {
    store: Option<Arc<dyn SortedSetStore>>,
    repository: Option<Arc<dyn JobRepository>>,
    registry: Option<Arc<JobRegistry>>,
    events: Option<Arc<EventBus>>,
    clock: Option<Arc<dyn Clock>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    services: Option<Arc<JobServices>>,
    key_prefix: Option<String>,
    promotion_batch: Option<usize>,
}

impl QueueContextBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SortedSetStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    #[must_use]
    pub fn services(mut self, services: JobServices) -> Self {
        self.services = Some(Arc::new(services));
        self
    }

    /// Prefix of every store key (default `workq`).
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn promotion_batch(mut self, batch: usize) -> Self {
        self.promotion_batch = Some(batch);
        self
    }

    /// Builds the context.
    pub fn build(self) -> JobResult<QueueContext> {
        let store = self
            .store
            .ok_or_else(|| JobError::Configuration("queue context needs a store".into()))?;
        let repository = self
            .repository
            .ok_or_else(|| JobError::Configuration("queue context needs a repository".into()))?;
        let promotion_batch = self.promotion_batch.unwrap_or(DEFAULT_PROMOTION_BATCH);
        if promotion_batch == 0 {
            return Err(JobError::Configuration(
                "promotion batch must be at least 1".into(),
            ));
        }

        Ok(QueueContext {
            store,
            repository,
            registry: self.registry.unwrap_or_default(),
            events: self.events.unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            memory_probe: self
                .memory_probe
                .unwrap_or_else(|| Arc::new(ProcMemoryProbe)),
            services: self.services.unwrap_or_default(),
            keys: self.key_prefix.map(QueueKeys::new).unwrap_or_default(),
            promotion_batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryJobRepository;
    use crate::store::MemoryStore;

    #[test]
    fn test_build_requires_store_and_repository() {
        let err = QueueContext::builder().build().unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));

        let err = QueueContext::builder()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("repository"));
    }

    #[test]
    fn test_build_defaults() {
        let ctx = QueueContext::builder()
            .store(Arc::new(MemoryStore::new()))
            .repository(Arc::new(MemoryJobRepository::new()))
            .key_prefix("test")
            .build()
            .unwrap();

        assert_eq!(ctx.keys().queue("email"), "test:queue:email");
        assert_eq!(ctx.promotion_batch(), DEFAULT_PROMOTION_BATCH);
        assert!(ctx.registry().job_types().is_empty());
        assert_eq!(ctx.events().listener_count(), 0);
    }

    #[test]
    fn test_zero_promotion_batch_rejected() {
        let result = QueueContext::builder()
            .store(Arc::new(MemoryStore::new()))
            .repository(Arc::new(MemoryJobRepository::new()))
            .promotion_batch(0)
            .build();
        assert!(result.is_err());
    }
}
