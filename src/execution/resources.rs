//! Resource limits applied to a container's host configuration.
//!
//! Every limit is optional: an unset limit leaves the engine default in place.

use serde::{Deserialize, Serialize};

/// CFS scheduler period used to express CPU limits, in microseconds.
const CPU_PERIOD_US: i64 = 100_000;

/// Resource limits for a single container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory limit in megabytes.
    pub memory_mb: Option<u64>,
    /// CPU cores available (e.g. 0.5, 1.0, 2.0).
    pub cpu_cores: Option<f64>,
    /// Maximum number of processes allowed.
    pub max_processes: Option<u64>,
}

impl ResourceLimits {
    /// Creates limits with every field set.
    pub fn new(memory_mb: u64, cpu_cores: f64, max_processes: u64) -> Self {
        Self {
            memory_mb: Some(memory_mb),
            cpu_cores: Some(cpu_cores),
            max_processes: Some(max_processes),
        }
    }

    /// Returns the memory limit in bytes.
    pub fn memory_bytes(&self) -> Option<i64> {
        self.memory_mb
            .map(|mb| i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX))
    }

    /// Returns the CPU period in microseconds when a CPU limit is set.
    pub fn cpu_period(&self) -> Option<i64> {
        self.cpu_cores.map(|_| CPU_PERIOD_US)
    }

    /// Returns the CPU quota based on cores allocated.
    ///
    /// Formula: quota = period * cores, so 1.0 core = 100000 (100% of one CPU).
    pub fn cpu_quota(&self) -> Option<i64> {
        self.cpu_cores
            .map(|cores| (CPU_PERIOD_US as f64 * cores) as i64)
    }

    /// Returns the process limit as the engine expects it.
    pub fn pids_limit(&self) -> Option<i64> {
        self.max_processes
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
    }
}
