//! Registry mapping job type tags to factories.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobDefinition, JobRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type JobFactory = Arc<dyn Fn(JobRecord) -> JobResult<Box<dyn Job>> + Send + Sync>;

/// Registry of job types, enabling reconstruction by tag.
///
/// Domain packages add their own types with [`JobRegistry::register`]; the
/// engine never needs to know them in advance.
#[derive(Default)]
pub struct JobRegistry {
    factories: RwLock<HashMap<String, JobFactory>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job type under its `JOB_TYPE` tag.
    pub fn register<T: JobDefinition>(&self) -> &Self {
        self.register_factory(T::JOB_TYPE, |record| {
            T::from_record(record).map(|job| Box::new(job) as Box<dyn Job>)
        })
    }

    /// Registers a factory under an explicit tag.
    pub fn register_factory<F>(&self, job_type: &str, factory: F) -> &Self
    where
        F: Fn(JobRecord) -> JobResult<Box<dyn Job>> + Send + Sync + 'static,
    {
        debug!(job_type = %job_type, "Registered job type");
        self.factories
            .write()
            .insert(job_type.to_string(), Arc::new(factory));
        self
    }

    /// Rebuilds a job from its record.
    ///
    /// Empty or unregistered tags are rejected; nothing is ever built from a
    /// default type.
    pub fn build(&self, record: JobRecord) -> JobResult<Box<dyn Job>> {
        if record.job_type.trim().is_empty() {
            return Err(JobError::MissingJobType);
        }

        let factory = self
            .factories
            .read()
            .get(&record.job_type)
            .cloned()
            .ok_or_else(|| JobError::UnknownJobType(record.job_type.clone()))?;

        factory(record)
    }

    /// Check if job type is registered.
    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.read().contains_key(job_type)
    }

    /// Get registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
