//! Resource measurement types shared between the monitor and notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Coarse system health, ordered from healthy to starved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    Normal,
    Warning,
    Critical,
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceLevel::Normal => "normal",
            ResourceLevel::Warning => "warning",
            ResourceLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Memory figures for the current process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessMemory {
    /// Resident set size
    pub rss_bytes: Option<u64>,
    /// Data segment (heap + anonymous mappings)
    pub heap_bytes: Option<u64>,
}

/// System memory status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
    #[serde(default)]
    pub process: ProcessMemory,
}

impl MemoryStatus {
    /// Build a status from total and free (available) bytes.
    pub fn from_figures(total_bytes: u64, free_bytes: u64) -> Self {
        let free_bytes = free_bytes.min(total_bytes);
        let used_bytes = total_bytes - free_bytes;
        Self {
            total_bytes,
            free_bytes,
            used_bytes,
            usage_percent: percent(used_bytes, total_bytes),
            process: ProcessMemory::default(),
        }
    }
}

/// Filesystem status for the volume holding `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskStatus {
    pub path: PathBuf,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
}

impl DiskStatus {
    pub fn from_figures(path: impl Into<PathBuf>, total_bytes: u64, free_bytes: u64) -> Self {
        let free_bytes = free_bytes.min(total_bytes);
        let used_bytes = total_bytes - free_bytes;
        Self {
            path: path.into(),
            total_bytes,
            free_bytes,
            used_bytes,
            usage_percent: percent(used_bytes, total_bytes),
        }
    }
}

/// A point-in-time view of memory and, optionally, one disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// `None` when memory could not be measured
    pub memory: Option<MemoryStatus>,
    pub disk: Option<DiskStatus>,
    pub taken_at: DateTime<Utc>,
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(ResourceLevel::Normal < ResourceLevel::Warning);
        assert!(ResourceLevel::Warning < ResourceLevel::Critical);
        assert_eq!(
            ResourceLevel::Normal.max(ResourceLevel::Critical),
            ResourceLevel::Critical
        );
    }

    #[test]
    fn test_memory_from_figures() {
        let status = MemoryStatus::from_figures(1000, 250);
        assert_eq!(status.used_bytes, 750);
        assert!((status.usage_percent - 75.0).abs() < f64::EPSILON);

        let empty = MemoryStatus::from_figures(0, 0);
        assert_eq!(empty.usage_percent, 0.0);
    }
}
