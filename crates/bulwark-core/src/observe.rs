//! Optional metrics instrumentation for bulwark.
//!
//! When the `observe` feature is enabled, key operations emit counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream
//! application must install a metrics recorder (e.g. `metrics-exporter-prometheus`)
//! to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

use crate::error::ErrorKind;
use crate::types::ResourceLevel;

/// Record the outcome of a retried operation.
///
/// - `bulwark.retry.operations_total` – counter with `outcome` label
/// - `bulwark.retry.attempts` – histogram of attempts per operation
#[inline]
pub fn record_operation(attempts: u32, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("bulwark.retry.operations_total", "outcome" => outcome).increment(1);
        metrics::histogram!("bulwark.retry.attempts").record(f64::from(attempts));
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (attempts, success);
    }
}

/// Record a scheduled retry.
///
/// - `bulwark.retry.retries_total` – counter with `kind` label
/// - `bulwark.retry.delay_seconds` – histogram
#[inline]
pub fn record_retry(kind: ErrorKind, delay: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("bulwark.retry.retries_total", "kind" => kind.as_str()).increment(1);
        metrics::histogram!("bulwark.retry.delay_seconds").record(delay.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (kind, delay);
    }
}

/// Set write queue depth gauges.
///
/// - `bulwark.write_queue.pending` – gauge
/// - `bulwark.write_queue.active` – gauge
#[inline]
pub fn set_write_queue_depth(pending: usize, active: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("bulwark.write_queue.pending").set(pending as f64);
        metrics::gauge!("bulwark.write_queue.active").set(active as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (pending, active);
    }
}

/// Record a persisted checkpoint.
///
/// - `bulwark.checkpoint.saves_total` – counter
/// - `bulwark.checkpoint.save_duration_seconds` – histogram
#[inline]
pub fn record_checkpoint_save(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("bulwark.checkpoint.saves_total").increment(1);
        metrics::histogram!("bulwark.checkpoint.save_duration_seconds")
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record how a transaction ended.
///
/// - `bulwark.transaction.total` – counter with `outcome` label
///   (`committed` / `rolled_back` / `rollback_incomplete`)
#[inline]
pub fn record_transaction(outcome: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("bulwark.transaction.total", "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = outcome;
    }
}

/// Record a cache hit or miss.
///
/// - `bulwark.cache.lookups_total` – counter with `result` label (`hit` / `miss`)
#[inline]
pub fn record_cache_lookup(hit: bool) {
    #[cfg(feature = "observe")]
    {
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!("bulwark.cache.lookups_total", "result" => result).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = hit;
    }
}

/// Set the current cache size gauges.
///
/// - `bulwark.cache.entries` – gauge
/// - `bulwark.cache.bytes` – gauge
#[inline]
pub fn set_cache_size(entries: usize, bytes: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("bulwark.cache.entries").set(entries as f64);
        metrics::gauge!("bulwark.cache.bytes").set(bytes as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (entries, bytes);
    }
}

/// Set the assessed resource level gauge (0 normal, 1 warning, 2 critical).
///
/// - `bulwark.resources.level` – gauge
#[inline]
pub fn set_resource_level(level: ResourceLevel) {
    #[cfg(feature = "observe")]
    {
        let value = match level {
            ResourceLevel::Normal => 0.0,
            ResourceLevel::Warning => 1.0,
            ResourceLevel::Critical => 2.0,
        };
        metrics::gauge!("bulwark.resources.level").set(value);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = level;
    }
}
