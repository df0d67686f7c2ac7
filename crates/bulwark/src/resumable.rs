//! Resumable, checkpointed task processing
//!
//! Runs a long operation with periodic checkpoints and bounded retries:
//!
//! 1. **Resume**: an existing checkpoint for the task id is handed to the
//!    processor as its starting point
//! 2. **Checkpoint**: every progress report that crosses a multiple of the
//!    checkpoint interval (or reaches 100%) is persisted before the report
//!    returns, so a crash loses at most one interval of work
//! 3. **Retry**: a failed attempt is retried after `base * 2^(attempt-1)`,
//!    resuming from the in-memory progress of the failed attempt
//! 4. **Finish**: success deletes the checkpoint; exhausting the attempts
//!    leaves a failure checkpoint for diagnostics
//!
//! Only a new call (typically after a process restart) resumes from the
//! persisted checkpoint. Retries inside one call never go back to it, so
//! they cannot regress progress that was already reported.
//!
//! # Example
//!
//! ```no_run
//! use bulwark::prelude::*;
//! use bulwark::resumable::{ProcessOptions, ResumableProcessor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let processor = ResumableProcessor::new(ResumableConfig::new("./checkpoints"));
//!
//! let slides = processor
//!     .process_with_retry(
//!         "import:quarterly.pptx",
//!         |resume, ctx| async move {
//!             let start = (resume.progress / 10.0) as usize;
//!             for slide in start..10 {
//!                 // convert slide...
//!                 ctx.report_progress((slide + 1) as f64 * 10.0).await?;
//!             }
//!             Ok::<_, anyhow::Error>(10)
//!         },
//!         ProcessOptions::default(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::cancel::CancellationToken;
use crate::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
use crate::{BulwarkError, Notification, Notifier, Result, ResumableConfig};
use bulwark_core::observe;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Where an attempt starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// Progress already achieved, in percent
    pub progress: f64,
    /// Payload of the latest checkpoint or progress report
    pub data: Option<serde_json::Value>,
    /// Whether this point was loaded from a persisted checkpoint
    pub from_checkpoint: bool,
    /// 1-based attempt number within this call
    pub attempt: u32,
}

/// Per-call overrides for [`ResumableProcessor::process_with_retry`].
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub max_attempts: Option<u32>,
    pub checkpoint_interval: Option<f64>,
    pub retry_base_delay: Option<Duration>,
    /// Token the caller keeps to cancel the task
    pub cancellation: Option<CancellationToken>,
}

impl ProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: f64) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

struct ProgressState {
    current: f64,
    last_saved: f64,
    data: Option<serde_json::Value>,
    attempt: u32,
}

struct TaskShared {
    task_id: String,
    store: Arc<dyn CheckpointStore>,
    interval: f64,
    notifier: Notifier,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    state: Mutex<ProgressState>,
}

/// Handle given to the processor for reporting progress and observing
/// cancellation.
#[derive(Clone)]
pub struct TaskContext {
    shared: Arc<TaskShared>,
}

impl TaskContext {
    pub fn task_id(&self) -> &str {
        &self.shared.task_id
    }

    /// Highest progress reported so far, in percent.
    pub fn progress(&self) -> f64 {
        self.shared.state.lock().current
    }

    pub fn data(&self) -> Option<serde_json::Value> {
        self.shared.state.lock().data.clone()
    }

    pub fn attempt(&self) -> u32 {
        self.shared.state.lock().attempt
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Fail with [`BulwarkError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BulwarkError::Cancelled {
                task_id: self.shared.task_id.clone(),
                progress: self.progress(),
            })
        } else {
            Ok(())
        }
    }

    /// Report progress in percent.
    ///
    /// Persists a checkpoint first when the report crosses a checkpoint
    /// boundary, then fails with [`BulwarkError::Cancelled`] if cancellation
    /// was requested.
    pub async fn report_progress(&self, progress: f64) -> Result<()> {
        self.report(progress, None).await
    }

    /// Report progress together with the state needed to resume from it.
    pub async fn report_progress_with_data(
        &self,
        progress: f64,
        data: serde_json::Value,
    ) -> Result<()> {
        self.report(progress, Some(data)).await
    }

    async fn report(&self, progress: f64, data: Option<serde_json::Value>) -> Result<()> {
        if !progress.is_finite() {
            return Err(BulwarkError::InvalidState(format!(
                "task {} reported non-finite progress {}",
                self.shared.task_id, progress
            )));
        }

        let checkpoint = {
            let mut state = self.shared.state.lock();
            let progress = progress.clamp(0.0, 100.0);
            if progress < state.current {
                tracing::debug!(
                    "Task {} reported {:.1}% below recorded {:.1}%, keeping recorded",
                    self.shared.task_id,
                    progress,
                    state.current
                );
            } else {
                state.current = progress;
            }
            if data.is_some() {
                state.data = data;
            }

            if self.crosses_boundary(state.last_saved, state.current) {
                Some(
                    Checkpoint::new(self.shared.task_id.clone(), state.current)
                        .with_data(state.data.clone())
                        .with_attempt(state.attempt),
                )
            } else {
                None
            }
        };

        if let Some(checkpoint) = checkpoint {
            self.persist(&checkpoint).await?;
            let mut state = self.shared.state.lock();
            state.last_saved = state.last_saved.max(checkpoint.progress);
        }

        self.check_cancelled()
    }

    fn crosses_boundary(&self, last_saved: f64, current: f64) -> bool {
        if current >= 100.0 {
            return last_saved < 100.0;
        }
        let interval = self.shared.interval;
        (current / interval).floor() > (last_saved / interval).floor()
    }

    async fn persist(&self, checkpoint: &Checkpoint) -> Result<()> {
        let started = Instant::now();
        self.shared.store.save(checkpoint).await?;
        observe::record_checkpoint_save(started.elapsed());
        tracing::debug!(
            "Checkpoint saved for task {} at {:.1}%",
            checkpoint.task_id,
            checkpoint.progress
        );
        self.shared.notifier.emit(Notification::CheckpointSaved {
            task_id: checkpoint.task_id.clone(),
            progress: checkpoint.progress,
        });
        Ok(())
    }

    fn begin_attempt(&self, attempt: u32) {
        self.shared.state.lock().attempt = attempt;
    }

    fn snapshot_checkpoint(&self) -> Checkpoint {
        let state = self.shared.state.lock();
        Checkpoint::new(self.shared.task_id.clone(), state.current)
            .with_data(state.data.clone())
            .with_attempt(state.attempt)
    }
}

/// A task currently inside `process_with_retry`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTask {
    pub task_id: String,
    pub progress: f64,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

/// Removes a task's bookkeeping entry when its call ends, however it ends.
struct ActiveGuard {
    active: Arc<DashMap<String, TaskContext>>,
    task_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.task_id);
    }
}

/// Runs tasks with checkpoint-based resumption and retry.
///
/// Cloning is cheap; clones share the store and bookkeeping.
#[derive(Clone)]
pub struct ResumableProcessor {
    store: Arc<dyn CheckpointStore>,
    config: ResumableConfig,
    notifier: Notifier,
    active: Arc<DashMap<String, TaskContext>>,
}

impl ResumableProcessor {
    /// Create a processor storing checkpoints under `config.checkpoint_dir`.
    pub fn new(config: ResumableConfig) -> Self {
        let store = Arc::new(FileCheckpointStore::new(config.checkpoint_dir.clone()));
        Self::with_store(config, store, Notifier::new())
    }

    pub fn with_store(
        config: ResumableConfig,
        store: Arc<dyn CheckpointStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            config,
            notifier,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &ResumableConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run `processor` for `task_id`, resuming from its checkpoint if one
    /// exists and retrying failed attempts.
    ///
    /// Fails with [`BulwarkError::TaskFailed`] once attempts are exhausted,
    /// [`BulwarkError::Cancelled`] if the task was cancelled, and
    /// [`BulwarkError::InvalidState`] if the same task id is already running.
    pub async fn process_with_retry<F, Fut, T>(
        &self,
        task_id: &str,
        mut processor: F,
        options: ProcessOptions,
    ) -> Result<T>
    where
        F: FnMut(ResumePoint, TaskContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.max_attempts)
            .max(1);
        let base_delay = options
            .retry_base_delay
            .unwrap_or_else(|| self.config.retry_base_delay());
        let interval = options
            .checkpoint_interval
            .unwrap_or(self.config.checkpoint_interval);
        if !(interval > 0.0) {
            return Err(BulwarkError::Config(format!(
                "checkpoint interval must be positive, got {}",
                interval
            )));
        }

        let resumed = match self.store.load(task_id).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable checkpoint for task {}: {}",
                    task_id,
                    e
                );
                None
            }
        };
        let from_checkpoint = resumed.is_some();
        let (progress, data) = resumed
            .map(|c| (c.progress, c.data))
            .unwrap_or((0.0, None));

        let ctx = TaskContext {
            shared: Arc::new(TaskShared {
                task_id: task_id.to_string(),
                store: self.store.clone(),
                interval,
                notifier: self.notifier.clone(),
                cancel: options.cancellation.unwrap_or_default(),
                started_at: Utc::now(),
                state: Mutex::new(ProgressState {
                    current: progress,
                    last_saved: progress,
                    data,
                    attempt: 0,
                }),
            }),
        };

        let _guard = self.register(&ctx)?;

        if from_checkpoint {
            tracing::info!("Resuming task {} from {:.1}%", task_id, progress);
            self.notifier.emit(Notification::TaskResumed {
                task_id: task_id.to_string(),
                progress,
            });
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            ctx.begin_attempt(attempt);

            if ctx.is_cancelled() {
                return self.finish_cancelled(&ctx).await;
            }

            let resume = ResumePoint {
                progress: ctx.progress(),
                data: ctx.data(),
                from_checkpoint: from_checkpoint && attempt == 1,
                attempt,
            };

            let err = match processor(resume, ctx.clone()).await {
                Ok(value) => {
                    if let Err(e) = self.store.delete(task_id).await {
                        tracing::warn!("Failed to delete checkpoint for task {}: {}", task_id, e);
                    }
                    tracing::info!("Task {} completed after {} attempt(s)", task_id, attempt);
                    self.notifier.emit(Notification::TaskCompleted {
                        task_id: task_id.to_string(),
                        attempts: attempt,
                    });
                    return Ok(value);
                }
                Err(err) => err,
            };

            if ctx.is_cancelled() || is_cancellation(&err) {
                return self.finish_cancelled(&ctx).await;
            }

            let message = format!("{:#}", err);
            self.notifier.emit(Notification::TaskRetry {
                task_id: task_id.to_string(),
                attempt,
                max_attempts,
                error: message.clone(),
            });

            if attempt >= max_attempts {
                return Err(self.finish_failed(&ctx, attempt, message).await);
            }

            let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
            tracing::warn!(
                "Task {} attempt {}/{} failed at {:.1}%, retrying in {:?}: {}",
                task_id,
                attempt,
                max_attempts,
                ctx.progress(),
                delay,
                message
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancellation_token().cancelled() => {
                    return self.finish_cancelled(&ctx).await;
                }
            }
        }
    }

    fn register(&self, ctx: &TaskContext) -> Result<ActiveGuard> {
        use dashmap::mapref::entry::Entry;

        match self.active.entry(ctx.task_id().to_string()) {
            Entry::Occupied(_) => Err(BulwarkError::InvalidState(format!(
                "task '{}' is already running",
                ctx.task_id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(ctx.clone());
                Ok(ActiveGuard {
                    active: self.active.clone(),
                    task_id: ctx.task_id().to_string(),
                })
            }
        }
    }

    async fn finish_cancelled<T>(&self, ctx: &TaskContext) -> Result<T> {
        let checkpoint = ctx.snapshot_checkpoint();
        if let Err(e) = ctx.persist(&checkpoint).await {
            tracing::warn!(
                "Failed to checkpoint cancelled task {}: {}",
                ctx.task_id(),
                e
            );
        }
        tracing::info!(
            "Task {} cancelled at {:.1}%",
            ctx.task_id(),
            checkpoint.progress
        );
        self.notifier.emit(Notification::TaskCancelled {
            task_id: ctx.task_id().to_string(),
            progress: checkpoint.progress,
        });
        Err(BulwarkError::Cancelled {
            task_id: ctx.task_id().to_string(),
            progress: checkpoint.progress,
        })
    }

    async fn finish_failed(&self, ctx: &TaskContext, attempts: u32, message: String) -> BulwarkError {
        let checkpoint = ctx.snapshot_checkpoint().with_error(message.clone());
        if let Err(e) = ctx.persist(&checkpoint).await {
            tracing::warn!(
                "Failed to write failure checkpoint for task {}: {}",
                ctx.task_id(),
                e
            );
        }
        tracing::error!(
            "Task {} failed after {} attempt(s): {}",
            ctx.task_id(),
            attempts,
            message
        );
        self.notifier.emit(Notification::TaskFailed {
            task_id: ctx.task_id().to_string(),
            attempts,
            error: message.clone(),
        });
        BulwarkError::TaskFailed {
            task_id: ctx.task_id().to_string(),
            attempts,
            last_error: message,
        }
    }

    /// Load the persisted checkpoint for `task_id`.
    pub async fn checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        self.store.load(task_id).await
    }

    /// Delete the persisted checkpoint for `task_id`, forcing the next run to
    /// start from zero.
    pub async fn discard_checkpoint(&self, task_id: &str) -> Result<bool> {
        self.store.delete(task_id).await
    }

    /// Tasks currently running through this processor.
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.active
            .iter()
            .map(|entry| {
                let ctx = entry.value();
                ActiveTask {
                    task_id: ctx.task_id().to_string(),
                    progress: ctx.progress(),
                    attempt: ctx.attempt(),
                    started_at: ctx.shared.started_at,
                }
            })
            .collect()
    }

    /// Request cancellation of a running task. Returns whether it was running.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.active.get(task_id) {
            Some(ctx) => {
                ctx.cancellation_token().cancel();
                true
            }
            None => false,
        }
    }

    /// Delete checkpoints older than the configured retention window.
    pub async fn cleanup_stale_checkpoints(&self) -> Result<usize> {
        self.store.cleanup_older_than(self.config.retention()).await
    }

    /// Start a background sweep deleting stale checkpoints every
    /// `cleanup_interval`.
    pub fn start_cleanup(&self) -> SweepHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let store = self.store.clone();
        let retention = self.config.retention();
        let every = self.config.cleanup_interval().max(Duration::from_millis(1));
        let stop = shutdown.clone();

        let handle = tokio::spawn(async move {
            tracing::info!("Checkpoint sweep started (interval: {:?})", every);
            let mut ticker = tokio::time::interval(every);
            while !stop.load(Ordering::Relaxed) {
                ticker.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = store.cleanup_older_than(retention).await {
                    tracing::error!("Checkpoint sweep error: {}", e);
                }
            }
            tracing::info!("Checkpoint sweep stopped");
        });

        SweepHandle { shutdown, handle }
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<BulwarkError>()
            .is_some_and(BulwarkError::is_cancelled)
    })
}

/// Handle for stopping a background sweep
#[must_use = "the sweep stops when the handle is dropped"]
pub struct SweepHandle {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal shutdown and stop the sweep task.
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn processor(dir: &TempDir) -> ResumableProcessor {
        ResumableProcessor::new(
            ResumableConfig::new(dir.path()).with_retry_base_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_success_deletes_checkpoint() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);

        let result = processor
            .process_with_retry(
                "convert",
                |_, ctx| async move {
                    for p in [25.0, 50.0, 75.0] {
                        ctx.report_progress(p).await?;
                    }
                    Ok::<_, anyhow::Error>("ok")
                },
                ProcessOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert!(processor.checkpoint("convert").await.unwrap().is_none());
        assert!(processor.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_written_on_boundary() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);
        let observer = processor.clone();

        let result: Result<()> = processor
            .process_with_retry(
                "ocr",
                move |_, ctx| {
                    let observer = observer.clone();
                    async move {
                        ctx.report_progress(5.0).await?;
                        assert!(observer.checkpoint("ocr").await?.is_none());
                        ctx.report_progress(12.0).await?;
                        let saved = observer.checkpoint("ocr").await?.unwrap();
                        assert_eq!(saved.progress, 12.0);
                        Err::<(), _>(anyhow::anyhow!("stop here"))
                    }
                },
                ProcessOptions::default().with_max_attempts(1),
            )
            .await;

        assert!(matches!(result, Err(BulwarkError::TaskFailed { attempts: 1, .. })));
        let failed = processor.checkpoint("ocr").await.unwrap().unwrap();
        assert_eq!(failed.progress, 12.0);
        assert_eq!(failed.error.as_deref(), Some("stop here"));
    }

    #[tokio::test]
    async fn test_retry_keeps_in_memory_progress() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let result = processor
            .process_with_retry(
                "batch",
                move |resume, ctx| {
                    let s = s.clone();
                    async move {
                        s.lock().push(resume.progress);
                        if resume.attempt == 1 {
                            // 15% is not a checkpoint boundary past 10%
                            ctx.report_progress(10.0).await?;
                            ctx.report_progress(15.0).await?;
                            anyhow::bail!("SQLITE_BUSY");
                        }
                        ctx.report_progress(100.0).await?;
                        Ok::<_, anyhow::Error>(resume.attempt)
                    }
                },
                ProcessOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(*seen.lock(), vec![0.0, 15.0]);
    }

    #[tokio::test]
    async fn test_non_finite_progress_rejected() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);

        let result: Result<()> = processor
            .process_with_retry(
                "nan",
                |_, ctx| async move {
                    ctx.report_progress(40.0).await?;
                    let err = ctx.report_progress(f64::NAN).await.unwrap_err();
                    assert!(matches!(err, BulwarkError::InvalidState(_)));
                    assert_eq!(ctx.progress(), 40.0);
                    Err::<(), _>(anyhow::anyhow!("decoder crashed"))
                },
                ProcessOptions::default().with_max_attempts(1),
            )
            .await;

        assert!(matches!(result, Err(BulwarkError::TaskFailed { .. })));
        let saved = processor.checkpoint("nan").await.unwrap().unwrap();
        assert_eq!(saved.progress, 40.0);
    }

    #[tokio::test]
    async fn test_duplicate_task_rejected() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);
        let inner = processor.clone();

        let result = processor
            .process_with_retry(
                "dup",
                move |_, _| {
                    let inner = inner.clone();
                    async move {
                        let nested = inner
                            .process_with_retry(
                                "dup",
                                |_, _| async { Ok::<_, anyhow::Error>(()) },
                                ProcessOptions::default(),
                            )
                            .await;
                        assert!(matches!(nested, Err(BulwarkError::InvalidState(_))));
                        Ok::<_, anyhow::Error>(())
                    }
                },
                ProcessOptions::default(),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);
        let token = CancellationToken::new();

        let t = token.clone();
        let result: Result<()> = processor
            .process_with_retry(
                "long",
                move |_, ctx| {
                    let t = t.clone();
                    async move {
                        ctx.report_progress(30.0).await?;
                        t.cancel();
                        ctx.report_progress(35.0).await?;
                        Err::<(), _>(anyhow::anyhow!("report after cancel must fail"))
                    }
                },
                ProcessOptions::default().with_cancellation(token),
            )
            .await;

        match result {
            Err(BulwarkError::Cancelled { progress, .. }) => assert_eq!(progress, 35.0),
            other => panic!("expected cancellation, got {:?}", other.err()),
        }
        let saved = processor.checkpoint("long").await.unwrap().unwrap();
        assert_eq!(saved.progress, 35.0);
        assert!(saved.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_by_task_id() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);
        let control = processor.clone();

        let result: Result<()> = processor
            .process_with_retry(
                "remote",
                move |_, ctx| {
                    let control = control.clone();
                    async move {
                        assert_eq!(control.active_tasks().len(), 1);
                        assert!(control.cancel("remote"));
                        ctx.check_cancelled()?;
                        Ok::<(), anyhow::Error>(())
                    }
                },
                ProcessOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(BulwarkError::Cancelled { .. })));
        assert!(!processor.cancel("remote"));
    }

    #[tokio::test]
    async fn test_dropping_sweep_handle_stops_sweep() {
        let dir = TempDir::new().unwrap();
        let processor = ResumableProcessor::new(
            ResumableConfig::new(dir.path()).with_cleanup_interval(Duration::from_millis(1)),
        );

        let handle = processor.start_cleanup();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(handle);

        let mut stale = Checkpoint::new("old-import", 50.0);
        stale.timestamp = Utc::now() - chrono::Duration::hours(2);
        processor.store().save(&stale).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(processor.checkpoint("old-import").await.unwrap().is_some());
        assert_eq!(processor.cleanup_stale_checkpoints().await.unwrap(), 1);
    }

    #[test]
    fn test_is_cancellation() {
        let err = anyhow::Error::new(BulwarkError::Cancelled {
            task_id: "t".into(),
            progress: 1.0,
        });
        assert!(is_cancellation(&err));
        assert!(!is_cancellation(&anyhow::anyhow!("boom")));
    }
}
