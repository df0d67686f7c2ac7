use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// `base * 2^attempt`, capped at the max delay
    #[default]
    Exponential,
    /// `base * (attempt + 1)`, capped at the max delay
    Linear,
}

/// Retry policy for the retry controller.
///
/// A controller holds one immutable policy; individual calls may pass an
/// overriding policy instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 5, so up to 6 attempts)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds (default: 100)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds (default: 5000)
    ///
    /// Jitter is applied after the cap, so an actual wait may exceed this by
    /// up to 25%.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffMode,

    /// Inflate each delay by up to 25% at random (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// How long the storage engine waits on a lock before reporting busy
    /// (default: 30s). Informational only, not enforced here.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffMode::default(),
            jitter: true,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffMode) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Un-jittered delay to wait after the failure of attempt `attempt`
    /// (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = match self.backoff {
            BackoffMode::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
            BackoffMode::Linear => self
                .base_delay_ms
                .saturating_mul(u64::from(attempt).saturating_add(1)),
        };
        Duration::from_millis(millis.min(self.max_delay_ms))
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}
