use super::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for the write serialization queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteQueueConfig {
    /// Writes allowed in flight at once (default: 1)
    ///
    /// The backing store tolerates a single writer in its default journal
    /// mode, so anything above 1 gives up completion ordering.
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,

    /// Retry policy applied to each write unless overridden per call
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_writes: default_max_concurrent_writes(),
            retry: RetryPolicy::default(),
        }
    }
}

impl WriteQueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_writes(mut self, max: usize) -> Self {
        self.max_concurrent_writes = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn default_max_concurrent_writes() -> usize {
    1
}
