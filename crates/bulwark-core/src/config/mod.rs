pub mod cache;
pub mod queue;
pub mod resource;
pub mod retry;
pub mod task;

pub use cache::CacheConfig;
pub use queue::WriteQueueConfig;
pub use resource::{ResourceMonitorConfig, ResourceThresholds};
pub use retry::{BackoffMode, RetryPolicy};
pub use task::ResumableConfig;

use crate::error::{BulwarkError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for every component, as loaded at the composition root.
///
/// Every section is optional in the serialized form; missing sections and
/// fields take their documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BulwarkConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub write_queue: WriteQueueConfig,

    #[serde(default)]
    pub resumable: ResumableConfig,

    #[serde(default)]
    pub resources: ResourceMonitorConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl BulwarkConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        validate_retry("retry", &self.retry)?;
        validate_retry("write_queue.retry", &self.write_queue.retry)?;

        if self.write_queue.max_concurrent_writes == 0 {
            return Err(BulwarkError::Config(
                "write_queue.max_concurrent_writes must be at least 1".to_string(),
            ));
        }

        let interval = self.resumable.checkpoint_interval;
        if !(interval > 0.0 && interval <= 100.0) {
            return Err(BulwarkError::Config(format!(
                "resumable.checkpoint_interval must be in (0, 100], got {}",
                interval
            )));
        }
        if self.resumable.max_attempts == 0 {
            return Err(BulwarkError::Config(
                "resumable.max_attempts must be at least 1".to_string(),
            ));
        }

        let t = &self.resources.thresholds;
        if t.memory_critical_free_bytes > t.memory_warning_free_bytes {
            return Err(BulwarkError::Config(
                "memory critical floor must not exceed the warning floor".to_string(),
            ));
        }
        if t.memory_warning_percent > t.memory_critical_percent {
            return Err(BulwarkError::Config(
                "memory warning percentage must not exceed the critical percentage".to_string(),
            ));
        }
        if t.disk_critical_free_bytes > t.disk_warning_free_bytes {
            return Err(BulwarkError::Config(
                "disk critical floor must not exceed the warning floor".to_string(),
            ));
        }

        if self.cache.max_entries == 0 || self.cache.max_bytes == 0 {
            return Err(BulwarkError::Config(
                "cache bounds must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_retry(section: &str, policy: &RetryPolicy) -> Result<()> {
    if policy.base_delay_ms > policy.max_delay_ms {
        return Err(BulwarkError::Config(format!(
            "{}: base delay {}ms exceeds max delay {}ms",
            section, policy.base_delay_ms, policy.max_delay_ms
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = BulwarkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.write_queue.max_concurrent_writes, 1);
        assert_eq!(config.resumable.checkpoint_interval, 10.0);
        assert_eq!(config.resumable.max_attempts, 3);
        assert_eq!(config.resumable.retention_secs, 3600);
        assert_eq!(config.cache.max_entries, 100);
        assert_eq!(config.cache.max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.cache.ttl_ms, 30 * 60 * 1000);
        assert_eq!(
            config.resources.thresholds.memory_warning_free_bytes,
            500 * 1024 * 1024
        );
        assert_eq!(config.resources.thresholds.memory_critical_percent, 95.0);
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"write_queue": {{"max_concurrent_writes": 2}}, "cache": {{"max_entries": 5}}}}"#
        )
        .unwrap();

        let config = BulwarkConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.write_queue.max_concurrent_writes, 2);
        assert_eq!(config.write_queue.retry.max_retries, 5);
        assert_eq!(config.cache.max_entries, 5);
        assert_eq!(config.cache.max_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = BulwarkConfig::default();
        config.write_queue.max_concurrent_writes = 0;
        assert!(matches!(config.validate(), Err(BulwarkError::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = BulwarkConfig::default();
        config.resources.thresholds.memory_critical_free_bytes = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = BulwarkConfig::default();
        config.retry.base_delay_ms = 10_000;
        assert!(config.validate().is_err());

        let mut config = BulwarkConfig::default();
        config.resumable.checkpoint_interval = 0.0;
        assert!(config.validate().is_err());
    }
}
