//! Uniform outcome record returned by every job execution.

use crate::error::JobResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Outcome of one job execution.
///
/// Only `execution_time` and `memory_usage` change after construction; the
/// processor fills them in once `execute()` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Whether the job did its work.
    pub successful: bool,
    /// Success payload.
    #[serde(default)]
    pub data: Value,
    /// Failure detail.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Short failure code.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Free-form context.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Wall time of `execute()` in seconds.
    #[serde(default)]
    pub execution_time: f64,
    /// Resident memory growth during `execute()` in bytes.
    #[serde(default)]
    pub memory_usage: u64,
}

impl JobOutcome {
    /// Successful outcome carrying `data`.
    pub fn success(data: Value) -> Self {
        Self {
            successful: true,
            data,
            error_message: None,
            error_code: None,
            metadata: serde_json::Map::new(),
            execution_time: 0.0,
            memory_usage: 0,
        }
    }

    /// Failed outcome.
    pub fn failure(message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            successful: false,
            data: Value::Null,
            error_message: Some(message.into()),
            error_code: code.map(str::to_string),
            metadata: serde_json::Map::new(),
            execution_time: 0.0,
            memory_usage: 0,
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stamps the execution metrics.
    pub(crate) fn record_metrics(&mut self, elapsed: Duration, memory_delta: u64) {
        self.execution_time = elapsed.as_secs_f64();
        self.memory_usage = memory_delta;
    }

    /// Encodes the outcome for the metadata store.
    pub fn to_storage(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an outcome written by [`JobOutcome::to_storage`].
    pub fn from_storage(raw: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
