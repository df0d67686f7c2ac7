//! Classification-aware retry with backoff
//!
//! Wraps a fallible async operation and retries it while it fails with a
//! retryable [`ErrorKind`] (`Busy` or `Locked`), waiting longer between each
//! attempt. Structural failures are surfaced immediately.
//!
//! # Example
//!
//! ```no_run
//! use bulwark::prelude::*;
//! use bulwark::retry::RetryController;
//!
//! # async fn example() -> Result<()> {
//! let controller = RetryController::new(RetryPolicy::default());
//!
//! let rows = controller
//!     .execute(|| async {
//!         // talk to the database here
//!         Ok::<_, anyhow::Error>(42)
//!     })
//!     .await?;
//! assert_eq!(rows, 42);
//! # Ok(())
//! # }
//! ```

use crate::{BulwarkError, ErrorKind, Notification, Notifier, Result, RetryPolicy};
use bulwark_core::observe;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound of the random inflation applied when jitter is enabled.
const JITTER_FRACTION: f64 = 0.25;

/// Running counters for a retry controller
#[derive(Debug, Default)]
pub struct RetryMetrics {
    /// Operations started
    pub total: AtomicU64,

    /// Operations that eventually succeeded
    pub successes: AtomicU64,

    /// Operations that failed terminally
    pub failures: AtomicU64,

    /// Retries performed (attempts beyond the first)
    pub retries: AtomicU64,

    /// Failed attempts per kind, indexed by [`ErrorKind::index`]
    pub errors_by_kind: [AtomicU64; 6],
}

impl RetryMetrics {
    fn record_start(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, kind: ErrorKind) {
        self.errors_by_kind[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        for counter in &self.errors_by_kind {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of metrics
    pub fn snapshot(&self) -> RetryMetricsSnapshot {
        RetryMetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            errors_by_kind: ErrorKind::ALL
                .iter()
                .map(|kind| {
                    (
                        *kind,
                        self.errors_by_kind[kind.index()].load(Ordering::Relaxed),
                    )
                })
                .collect(),
        }
    }
}

/// Snapshot of retry metrics
#[derive(Debug, Clone)]
pub struct RetryMetricsSnapshot {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub errors_by_kind: Vec<(ErrorKind, u64)>,
}

impl RetryMetricsSnapshot {
    /// Failed attempts observed for `kind`.
    pub fn errors(&self, kind: ErrorKind) -> u64 {
        self.errors_by_kind
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Get success rate (0.0 - 1.0) over settled operations
    pub fn success_rate(&self) -> f64 {
        let settled = self.successes + self.failures;
        if settled == 0 {
            1.0
        } else {
            self.successes as f64 / settled as f64
        }
    }
}

/// Retries fallible operations according to a [`RetryPolicy`].
///
/// Cloning is cheap and clones share metrics.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    metrics: Arc<RetryMetrics>,
    notifier: Notifier,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_notifier(policy, Notifier::new())
    }

    pub fn with_notifier(policy: RetryPolicy, notifier: Notifier) -> Self {
        Self {
            policy,
            metrics: Arc::new(RetryMetrics::default()),
            notifier,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<RetryMetrics> {
        &self.metrics
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run `operation` under the controller's policy.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let policy = self.policy.clone();
        self.execute_with_policy(operation, &policy).await
    }

    /// Run `operation` under an explicit policy for this call only.
    ///
    /// The operation is invoked up to `max_retries + 1` times. The error of
    /// the last attempt is returned as [`BulwarkError::Operation`] with the
    /// attempt count and elapsed time.
    pub async fn execute_with_policy<F, Fut, T>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.metrics.record_start();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    let attempts = attempt + 1;
                    self.metrics.record_success();
                    observe::record_operation(attempts, true);
                    if attempts > 1 {
                        tracing::debug!("Operation succeeded after {} attempts", attempts);
                    }
                    self.notifier
                        .emit(Notification::OperationSucceeded { attempts });
                    return Ok(value);
                }
                Err(err) => {
                    let kind = ErrorKind::classify(&err);
                    self.metrics.record_error(kind);

                    if !kind.is_retryable() || attempt >= policy.max_retries {
                        let attempts = attempt + 1;
                        self.metrics.record_failure();
                        observe::record_operation(attempts, false);
                        tracing::error!(
                            "Operation failed ({}) after {} attempt(s): {:#}",
                            kind,
                            attempts,
                            err
                        );
                        return Err(BulwarkError::Operation {
                            kind,
                            message: format!("{:#}", err),
                            attempts,
                            elapsed: started.elapsed(),
                            source: err,
                        });
                    }

                    let delay = self.delay_with_jitter(policy, attempt);
                    self.metrics.record_retry();
                    observe::record_retry(kind, delay);
                    tracing::warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}: {:#}",
                        attempt + 1,
                        policy.max_retries + 1,
                        kind,
                        delay,
                        err
                    );
                    self.notifier.emit(Notification::RetryScheduled {
                        attempt: attempt + 1,
                        kind,
                        delay_ms: delay.as_millis() as u64,
                    });

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_with_jitter(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let delay = policy.delay_for(attempt);
        if policy.jitter {
            delay.mul_f64(1.0 + fastrand::f64() * JITTER_FRACTION)
        } else {
            delay
        }
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
