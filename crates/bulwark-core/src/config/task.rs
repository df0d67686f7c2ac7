use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the resumable task processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumableConfig {
    /// Directory holding one `<task>.checkpoint.json` file per task
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Persist a checkpoint every time progress crosses a multiple of this
    /// many percentage points (default: 10)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: f64,

    /// Attempts per `process_with_retry` call (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the `base * 2^(attempt-1)` delay between attempts (default: 1000ms)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Checkpoints older than this are removed by the sweep (default: 1 hour)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How often the sweep runs once started (default: 10 minutes)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for ResumableConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_interval: default_checkpoint_interval(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl ResumableConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: f64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs();
        self
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_checkpoint_dir() -> PathBuf {
    std::env::temp_dir().join("bulwark-checkpoints")
}

fn default_checkpoint_interval() -> f64 {
    10.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    600
}
