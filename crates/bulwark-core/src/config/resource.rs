use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Floors and ceilings used to classify system health.
///
/// A level is reached when free memory drops below its floor OR memory usage
/// rises above its percentage. Disk is judged on free bytes only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceThresholds {
    /// Free memory below this is a warning (default: 500 MiB)
    #[serde(default = "default_memory_warning_free")]
    pub memory_warning_free_bytes: u64,

    /// Free memory below this is critical (default: 200 MiB)
    #[serde(default = "default_memory_critical_free")]
    pub memory_critical_free_bytes: u64,

    /// Memory usage above this percentage is a warning (default: 85)
    #[serde(default = "default_memory_warning_percent")]
    pub memory_warning_percent: f64,

    /// Memory usage above this percentage is critical (default: 95)
    #[serde(default = "default_memory_critical_percent")]
    pub memory_critical_percent: f64,

    /// Free disk below this is a warning (default: 1 GiB)
    #[serde(default = "default_disk_warning_free")]
    pub disk_warning_free_bytes: u64,

    /// Free disk below this is critical (default: 500 MiB)
    #[serde(default = "default_disk_critical_free")]
    pub disk_critical_free_bytes: u64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            memory_warning_free_bytes: default_memory_warning_free(),
            memory_critical_free_bytes: default_memory_critical_free(),
            memory_warning_percent: default_memory_warning_percent(),
            memory_critical_percent: default_memory_critical_percent(),
            disk_warning_free_bytes: default_disk_warning_free(),
            disk_critical_free_bytes: default_disk_critical_free(),
        }
    }
}

/// Configuration for the resource monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMonitorConfig {
    #[serde(default)]
    pub thresholds: ResourceThresholds,

    /// Path whose filesystem is included in level assessment, if any
    #[serde(default)]
    pub disk_path: Option<PathBuf>,

    /// Poll interval used by `start_monitoring_default` (default: 30s)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ResourceMonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: ResourceThresholds::default(),
            disk_path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ResourceMonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, thresholds: ResourceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_memory_warning_free() -> u64 {
    500 * MIB
}

fn default_memory_critical_free() -> u64 {
    200 * MIB
}

fn default_memory_warning_percent() -> f64 {
    85.0
}

fn default_memory_critical_percent() -> f64 {
    95.0
}

fn default_disk_warning_free() -> u64 {
    GIB
}

fn default_disk_critical_free() -> u64 {
    500 * MIB
}

fn default_poll_interval_ms() -> u64 {
    30_000
}
