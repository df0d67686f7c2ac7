use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a bounded cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries (default: 100)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Maximum sum of entry size estimates in bytes (default: 100 MiB)
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Entries older than this are treated as absent (default: 30 minutes)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

fn default_max_entries() -> usize {
    100
}

fn default_max_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_ttl_ms() -> u64 {
    30 * 60 * 1000
}
