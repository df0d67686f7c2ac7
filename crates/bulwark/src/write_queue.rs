//! Single-writer serialization queue
//!
//! Admits write operations in FIFO order and runs at most
//! `max_concurrent_writes` of them at a time, each through a
//! [`RetryController`]. With the default bound of 1 every write runs alone
//! and writes complete in the order they were enqueued.
//!
//! A write is placed in the queue when [`WriteQueue::enqueue_write`] is
//! called, not when the returned future is first polled, so enqueue order is
//! call order. Must be called from within a tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use bulwark::prelude::*;
//! use bulwark::write_queue::WriteQueue;
//!
//! # async fn example() -> Result<()> {
//! let queue = WriteQueue::new(WriteQueueConfig::default());
//!
//! let first = queue.enqueue_write(|| async { Ok::<_, anyhow::Error>("slide 1") });
//! let second = queue.enqueue_write(|| async { Ok::<_, anyhow::Error>("slide 2") });
//!
//! assert_eq!(first.await?, "slide 1");
//! assert_eq!(second.await?, "slide 2");
//! # Ok(())
//! # }
//! ```

use crate::retry::RetryController;
use crate::{BulwarkError, Notification, Notifier, Result, RetryPolicy, WriteQueueConfig};
use bulwark_core::observe;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};

/// Delivers a settled write's result to its caller.
type Deliver = Box<dyn FnOnce() + Send>;

type JobFuture = Pin<Box<dyn Future<Output = (bool, Deliver)> + Send>>;

/// Runs a write to completion and yields its success flag and delivery step.
type WriteJob = Box<dyn FnOnce() -> JobFuture + Send>;

struct QueuedWrite {
    id: u64,
    job: WriteJob,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedWrite>,
    active: usize,
}

struct QueueInner {
    config: WriteQueueConfig,
    retry: RetryController,
    state: Mutex<QueueState>,
    idle: Notify,
    next_id: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    notifier: Notifier,
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteQueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub max_concurrent_writes: usize,
}

/// Bounded-concurrency admission queue for writes.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<QueueInner>,
}

impl WriteQueue {
    pub fn new(config: WriteQueueConfig) -> Self {
        Self::with_notifier(config, Notifier::new())
    }

    pub fn with_notifier(config: WriteQueueConfig, notifier: Notifier) -> Self {
        let retry = RetryController::with_notifier(config.retry.clone(), notifier.clone());
        Self::with_controller(config, retry)
    }

    /// Build a queue around an existing controller, sharing its metrics and
    /// notifier.
    pub fn with_controller(mut config: WriteQueueConfig, retry: RetryController) -> Self {
        if config.max_concurrent_writes == 0 {
            tracing::warn!("max_concurrent_writes of 0 would stall the queue, using 1");
            config.max_concurrent_writes = 1;
        }
        let notifier = retry.notifier().clone();
        Self {
            inner: Arc::new(QueueInner {
                config,
                retry,
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                next_id: AtomicU64::new(1),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                notifier,
            }),
        }
    }

    pub fn retry_controller(&self) -> &RetryController {
        &self.inner.retry
    }

    /// Enqueue a write using the queue's retry policy.
    pub fn enqueue_write<F, Fut, T>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let policy = self.inner.config.retry.clone();
        self.enqueue_write_with_policy(operation, policy)
    }

    /// Enqueue a write with a retry policy for this write only.
    pub fn enqueue_write_with_policy<F, Fut, T>(
        &self,
        operation: F,
        policy: RetryPolicy,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let retry = self.inner.retry.clone();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let job: WriteJob = Box::new(move || -> JobFuture {
            Box::pin(async move {
                let result = retry.execute_with_policy(operation, &policy).await;
                let success = result.is_ok();
                let deliver: Deliver = Box::new(move || {
                    // Receiver gone means the caller stopped waiting.
                    let _ = tx.send(result);
                });
                (success, deliver)
            })
        });

        let pending = {
            let mut state = self.inner.state.lock();
            state.pending.push_back(QueuedWrite { id, job });
            state.pending.len()
        };
        tracing::debug!("Write {} enqueued ({} pending)", id, pending);
        self.inner
            .notifier
            .emit(Notification::WriteEnqueued { write_id: id, pending });

        QueueInner::admit(&self.inner);

        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(BulwarkError::WriteDropped),
            }
        }
    }

    /// Number of writes waiting for admission.
    pub fn pending_writes(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Number of writes currently executing.
    pub fn active_writes(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn stats(&self) -> WriteQueueStats {
        let state = self.inner.state.lock();
        WriteQueueStats {
            pending: state.pending.len(),
            active: state.active,
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            max_concurrent_writes: self.inner.config.max_concurrent_writes,
        }
    }

    /// Wait until nothing is pending or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a wake between check and await is not lost.
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl QueueInner {
    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.pending.is_empty() && state.active == 0
    }

    /// Start pending writes while there is room under the concurrency bound.
    fn admit(inner: &Arc<QueueInner>) {
        loop {
            let (write, active, pending) = {
                let mut state = inner.state.lock();
                if state.active >= inner.config.max_concurrent_writes {
                    return;
                }
                let Some(write) = state.pending.pop_front() else {
                    return;
                };
                state.active += 1;
                (write, state.active, state.pending.len())
            };

            observe::set_write_queue_depth(pending, active);
            tracing::debug!("Write {} admitted ({} active)", write.id, active);
            inner.notifier.emit(Notification::WriteAdmitted {
                write_id: write.id,
                active,
            });

            let slot = ActiveSlot {
                inner: inner.clone(),
                write_id: write.id,
                settled: None,
            };
            tokio::spawn(run_write(slot, write.job));
        }
    }

    fn release(inner: &Arc<QueueInner>, write_id: u64, success: Option<bool>) {
        let (pending, active) = {
            let mut state = inner.state.lock();
            state.active -= 1;
            (state.pending.len(), state.active)
        };
        observe::set_write_queue_depth(pending, active);

        match success {
            Some(true) => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
            }
            Some(false) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Write {} was dropped before it settled", write_id);
            }
        }
        inner.notifier.emit(Notification::WriteSettled {
            write_id,
            success: success.unwrap_or(false),
        });

        QueueInner::admit(inner);
        if inner.is_idle() {
            inner.idle.notify_waiters();
        }
    }
}

/// Holds one admission slot; releasing it (also on panic) admits the next write.
struct ActiveSlot {
    inner: Arc<QueueInner>,
    write_id: u64,
    settled: Option<bool>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        QueueInner::release(&self.inner, self.write_id, self.settled);
    }
}

async fn run_write(mut slot: ActiveSlot, job: WriteJob) {
    let write_id = slot.write_id;
    let (success, deliver) = job().await;
    slot.settled = Some(success);
    // The slot is freed before the caller sees the result so that a settled
    // write never counts as active.
    drop(slot);
    tracing::trace!("Write {} settled", write_id);
    deliver();
}
