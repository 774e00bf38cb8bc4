//! Memory and wall-time ceilings for a batch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use workq_config::WorkerSettings;

/// Why a batch returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The requested number of jobs was handled.
    MaxJobs,
    /// No queue yielded an entry.
    QueueEmpty,
    /// Process memory crossed the threshold.
    MemoryCeiling,
    /// Batch wall time crossed the threshold.
    TimeCeiling,
    /// The store could not be reached.
    StoreUnavailable,
}

impl StopReason {
    /// Returns true for the resource-exhaustion stops.
    pub fn is_resource_stop(&self) -> bool {
        matches!(self, StopReason::MemoryCeiling | StopReason::TimeCeiling)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::MaxJobs => "max_jobs",
            StopReason::QueueEmpty => "queue_empty",
            StopReason::MemoryCeiling => "memory_ceiling",
            StopReason::TimeCeiling => "time_ceiling",
            StopReason::StoreUnavailable => "store_unavailable",
        };
        f.write_str(name)
    }
}

/// Reads the process's current memory footprint.
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    /// Resident bytes, or `None` when unknown.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads resident set size from the `VmRSS` line of `/proc/self/status`.
///
/// The kernel reports it in kB whatever the page size. Returns `None` off
/// Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemoryProbe;

impl MemoryProbe for ProcMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: u64 = line["VmRSS:".len()..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib * 1024)
}

/// Probe reporting a settable value.
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    bytes: AtomicU64,
}

impl FixedMemoryProbe {
    /// Creates a probe reporting `bytes`.
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
        }
    }

    /// Changes the reported value.
    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }
}

/// Ceilings applied to one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes. `None` disables the memory check.
    pub memory_limit_bytes: Option<u64>,
    /// Wall-time ceiling. `None` disables the time check.
    pub max_execution_time: Option<Duration>,
    /// Fraction of each ceiling at which the batch stops.
    pub threshold: f64,
}

impl ResourceLimits {
    /// No ceilings at all.
    pub fn unlimited() -> Self {
        Self {
            memory_limit_bytes: None,
            max_execution_time: None,
            threshold: 0.8,
        }
    }

    /// Limits taken from the worker configuration.
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            memory_limit_bytes: settings.memory_limit_bytes(),
            max_execution_time: settings.max_execution_time(),
            threshold: settings.resource_threshold,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

/// Checks the ceilings for one batch.
#[derive(Debug, Clone)]
pub struct ResourceGuard {
    limits: ResourceLimits,
    probe: Arc<dyn MemoryProbe>,
    started: Instant,
}

impl ResourceGuard {
    /// Starts timing a batch.
    pub fn start(limits: ResourceLimits, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            limits,
            probe,
            started: Instant::now(),
        }
    }

    /// Time since the batch started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns the ceiling that tripped, if any. Memory is checked first.
    pub fn check(&self) -> Option<StopReason> {
        if let (Some(limit), Some(used)) =
            (self.limits.memory_limit_bytes, self.probe.resident_bytes())
        {
            if used as f64 > limit as f64 * self.limits.threshold {
                return Some(StopReason::MemoryCeiling);
            }
        }

        if let Some(max) = self.limits.max_execution_time {
            if self.elapsed().as_secs_f64() > max.as_secs_f64() * self.limits.threshold {
                return Some(StopReason::TimeCeiling);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(memory: Option<u64>, time: Option<Duration>) -> ResourceLimits {
        ResourceLimits {
            memory_limit_bytes: memory,
            max_execution_time: time,
            threshold: 0.8,
        }
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tworkq-worker\nVmPeak:\t  20480 kB\nVmRSS:\t   5120 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(5120 * 1024));
        assert_eq!(parse_vm_rss("Name:\tworkq-worker\n"), None);
        assert_eq!(parse_vm_rss("VmRSS:\tlots kB\n"), None);
    }

    #[test]
    fn test_memory_threshold() {
        let probe = Arc::new(FixedMemoryProbe::new(79));
        let guard = ResourceGuard::start(limits(Some(100), None), probe.clone());
        assert_eq!(guard.check(), None);

        probe.set(81);
        assert_eq!(guard.check(), Some(StopReason::MemoryCeiling));
    }

    #[test]
    fn test_time_threshold() {
        let probe = Arc::new(FixedMemoryProbe::new(0));
        let guard = ResourceGuard::start(limits(None, Some(Duration::ZERO)), probe);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(guard.check(), Some(StopReason::TimeCeiling));
    }

    #[test]
    fn test_unlimited_never_trips() {
        let probe = Arc::new(FixedMemoryProbe::new(u64::MAX));
        let guard = ResourceGuard::start(ResourceLimits::unlimited(), probe);
        assert_eq!(guard.check(), None);
    }

    #[test]
    fn test_from_settings() {
        let settings = WorkerSettings {
            memory_limit_mb: 1,
            max_execution_time_secs: 0,
            ..WorkerSettings::default()
        };
        let limits = ResourceLimits::from_settings(&settings);
        assert_eq!(limits.memory_limit_bytes, Some(1024 * 1024));
        assert_eq!(limits.max_execution_time, None);
    }
}
