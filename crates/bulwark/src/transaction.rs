//! Compensating transactions across stores that cannot share a commit
//!
//! A [`Transaction`] runs named steps one after another. Each step executes
//! immediately when added and may register a compensation that undoes it.
//! If a later step fails, [`Transaction::rollback`] walks the completed
//! steps in reverse order and runs their compensations, continuing past
//! compensations that fail and reporting all of them at the end.
//!
//! # Example
//!
//! ```no_run
//! use bulwark::prelude::*;
//! use bulwark::Transaction;
//!
//! # async fn create_remote() -> anyhow::Result<u64> { Ok(7) }
//! # async fn delete_remote(_id: u64) -> anyhow::Result<()> { Ok(()) }
//! # async fn create_local(_id: u64) -> anyhow::Result<()> { Ok(()) }
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let id = Transaction::run("create-presentation", |tx| async move {
//!     let id = tx
//!         .step_with_compensation("create-remote", create_remote, delete_remote)
//!         .await?;
//!     tx.step("create-local", || create_local(id)).await?;
//!     Ok(id)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::{BulwarkError, CompensationFailure, ErrorKind, Notification, Notifier, Result};
use bulwark_core::observe;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type CompensationFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Compensation = Box<dyn FnOnce() -> CompensationFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Idle,
    Running,
    Committed,
    RollingBack,
    RolledBack,
    /// A step failed; only rollback is allowed from here
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::RolledBack)
    }
}

/// Introspection view of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    /// Action error for failed steps, compensation error for steps whose
    /// rollback failed
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub has_compensation: bool,
}

struct StepEntry {
    record: StepRecord,
    compensation: Option<Compensation>,
}

struct TxState {
    status: TransactionStatus,
    steps: Vec<StepEntry>,
    // (step, kind, message) of the step that moved the transaction to Failed
    failure: Option<(String, ErrorKind, String)>,
}

struct TxInner {
    name: String,
    state: Mutex<TxState>,
    // Held for the whole of a step or rollback so no two ever overlap
    gate: tokio::sync::Mutex<()>,
    notifier: Notifier,
}

/// Outcome of [`Transaction::rollback`].
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackReport {
    pub transaction: String,
    /// True when every compensation succeeded
    pub success: bool,
    /// Steps undone, in the order they were undone
    pub rolled_back: Vec<String>,
    pub failures: Vec<CompensationFailure>,
    /// Error of the step that failed forward execution, if any
    pub cause: Option<String>,
}

impl RollbackReport {
    /// Turn an incomplete rollback into [`BulwarkError::Rollback`].
    pub fn into_result(self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(BulwarkError::Rollback {
                transaction: self.transaction,
                failures: self.failures,
                cause: self.cause,
            })
        }
    }
}

/// A sequence of eagerly executed steps with compensations.
///
/// Clones share the same transaction, so a clone can be moved into a task
/// while another is used for rollback.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl Transaction {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_notifier(name, Notifier::new())
    }

    pub fn with_notifier(name: impl Into<String>, notifier: Notifier) -> Self {
        Self {
            inner: Arc::new(TxInner {
                name: name.into(),
                state: Mutex::new(TxState {
                    status: TransactionStatus::Idle,
                    steps: Vec::new(),
                    failure: None,
                }),
                gate: tokio::sync::Mutex::new(()),
                notifier,
            }),
        }
    }

    /// Run `f` in a new transaction, committing if it succeeds and rolling
    /// back if it fails.
    pub async fn run<F, Fut, T>(name: impl Into<String>, f: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Transaction::new(name).execute(f).await
    }

    /// Like [`Transaction::run`] for an already constructed transaction.
    ///
    /// On failure the step error is returned if rollback was clean, and
    /// [`BulwarkError::Rollback`] otherwise. A step failure the closure
    /// ignored still rolls the transaction back and is returned as the
    /// error.
    pub async fn execute<F, Fut, T>(self, f: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let err = match f(self.clone()).await {
            Ok(value) => match self.status() {
                TransactionStatus::Running => {
                    self.commit()?;
                    return Ok(value);
                }
                TransactionStatus::Failed => {
                    let err = self.recorded_failure();
                    tracing::warn!(
                        "Transaction {} returned success after a failed step; rolling back",
                        self.inner.name
                    );
                    err
                }
                _ => return Ok(value),
            },
            Err(err) => err,
        };

        if self.status().is_terminal() {
            return Err(err);
        }
        let report = self.rollback().await?;
        if report.success {
            Err(err)
        } else {
            Err(BulwarkError::Rollback {
                transaction: report.transaction,
                failures: report.failures,
                cause: Some(err.to_string()),
            })
        }
    }

    fn recorded_failure(&self) -> BulwarkError {
        match &self.inner.state.lock().failure {
            Some((step, kind, message)) => BulwarkError::StepFailed {
                transaction: self.inner.name.clone(),
                step: step.clone(),
                kind: *kind,
                message: message.clone(),
            },
            None => BulwarkError::InvalidState(format!(
                "transaction '{}' failed without a recorded step error",
                self.inner.name
            )),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner.state.lock().status
    }

    pub fn steps(&self) -> Vec<StepRecord> {
        self.inner
            .state
            .lock()
            .steps
            .iter()
            .map(|s| s.record.clone())
            .collect()
    }

    /// Execute a step that needs no undo.
    pub async fn step<F, Fut, T>(&self, name: impl Into<String>, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_step(name.into(), false, action, |_: &T| None)
            .await
    }

    /// Execute a step and register `compensation`, which receives the step's
    /// result if the transaction is rolled back.
    pub async fn step_with_compensation<F, Fut, C, CFut, T>(
        &self,
        name: impl Into<String>,
        action: F,
        compensation: C,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        C: FnOnce(T) -> CFut + Send + 'static,
        CFut: Future<Output = anyhow::Result<()>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.execute_step(name.into(), true, action, move |value: &T| {
            let value = value.clone();
            let undo: Compensation =
                Box::new(move || -> CompensationFuture { Box::pin(compensation(value)) });
            Some(undo)
        })
        .await
    }

    async fn execute_step<F, Fut, T, M>(
        &self,
        name: String,
        has_compensation: bool,
        action: F,
        make_compensation: M,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        M: FnOnce(&T) -> Option<Compensation>,
    {
        let _gate = self.inner.gate.lock().await;

        let index = {
            let mut state = self.inner.state.lock();
            match state.status {
                TransactionStatus::Idle => state.status = TransactionStatus::Running,
                TransactionStatus::Running => {}
                other => {
                    return Err(BulwarkError::InvalidState(format!(
                        "cannot add step '{}' to transaction '{}' in state {:?}",
                        name, self.inner.name, other
                    )))
                }
            }
            state.steps.push(StepEntry {
                record: StepRecord {
                    name: name.clone(),
                    status: StepStatus::Running,
                    error: None,
                    started_at: Utc::now(),
                    ended_at: None,
                    has_compensation,
                },
                compensation: None,
            });
            state.steps.len() - 1
        };

        tracing::debug!("Transaction {}: step {} started", self.inner.name, name);
        self.inner.notifier.emit(Notification::StepStarted {
            transaction: self.inner.name.clone(),
            step: name.clone(),
        });

        match action().await {
            Ok(value) => {
                let compensation = make_compensation(&value);
                {
                    let mut state = self.inner.state.lock();
                    let entry = &mut state.steps[index];
                    entry.record.status = StepStatus::Completed;
                    entry.record.ended_at = Some(Utc::now());
                    entry.compensation = compensation;
                }
                self.inner.notifier.emit(Notification::StepCompleted {
                    transaction: self.inner.name.clone(),
                    step: name,
                });
                Ok(value)
            }
            Err(err) => {
                let kind = ErrorKind::classify(&err);
                let message = format!("{:#}", err);
                {
                    let mut state = self.inner.state.lock();
                    let entry = &mut state.steps[index];
                    entry.record.status = StepStatus::Failed;
                    entry.record.error = Some(message.clone());
                    entry.record.ended_at = Some(Utc::now());
                    state.status = TransactionStatus::Failed;
                    state.failure = Some((name.clone(), kind, message.clone()));
                }
                tracing::warn!(
                    "Transaction {}: step {} failed ({}): {}",
                    self.inner.name,
                    name,
                    kind,
                    message
                );
                self.inner.notifier.emit(Notification::StepFailed {
                    transaction: self.inner.name.clone(),
                    step: name.clone(),
                    error: message.clone(),
                });
                Err(BulwarkError::StepFailed {
                    transaction: self.inner.name.clone(),
                    step: name,
                    kind,
                    message,
                })
            }
        }
    }

    /// Mark the transaction committed. Only valid while it is running.
    pub fn commit(&self) -> Result<()> {
        let Ok(_gate) = self.inner.gate.try_lock() else {
            return Err(BulwarkError::InvalidState(format!(
                "transaction '{}' has a step in progress",
                self.inner.name
            )));
        };

        let steps = {
            let mut state = self.inner.state.lock();
            if state.status != TransactionStatus::Running {
                return Err(BulwarkError::InvalidState(format!(
                    "cannot commit transaction '{}' in state {:?}",
                    self.inner.name, state.status
                )));
            }
            state.status = TransactionStatus::Committed;
            // Compensations are never needed again
            for entry in state.steps.iter_mut() {
                entry.compensation = None;
            }
            state.steps.len()
        };

        tracing::info!(
            "Transaction {} committed ({} steps)",
            self.inner.name,
            steps
        );
        observe::record_transaction("committed");
        self.inner.notifier.emit(Notification::TransactionCommitted {
            transaction: self.inner.name.clone(),
            steps,
        });
        Ok(())
    }

    /// Undo completed steps in reverse order.
    ///
    /// Every compensation is attempted even if earlier ones fail. The
    /// transaction ends `RolledBack` either way; check
    /// [`RollbackReport::success`] or call [`RollbackReport::into_result`].
    /// Fails only if the transaction is already committed or rolled back.
    pub async fn rollback(&self) -> Result<RollbackReport> {
        let _gate = self.inner.gate.lock().await;

        let (pending, cause) = {
            let mut state = self.inner.state.lock();
            match state.status {
                TransactionStatus::Committed
                | TransactionStatus::RolledBack
                | TransactionStatus::RollingBack => {
                    return Err(BulwarkError::InvalidState(format!(
                        "cannot roll back transaction '{}' in state {:?}",
                        self.inner.name, state.status
                    )))
                }
                _ => state.status = TransactionStatus::RollingBack,
            }

            let cause = state
                .steps
                .iter()
                .rev()
                .find(|s| s.record.status == StepStatus::Failed)
                .and_then(|s| s.record.error.clone());

            let pending: Vec<(usize, String, Option<Compensation>)> = state
                .steps
                .iter_mut()
                .enumerate()
                .rev()
                .filter(|(_, s)| s.record.status == StepStatus::Completed)
                .map(|(i, s)| (i, s.record.name.clone(), s.compensation.take()))
                .collect();
            (pending, cause)
        };

        tracing::info!(
            "Rolling back transaction {} ({} completed steps)",
            self.inner.name,
            pending.len()
        );

        let mut rolled_back = Vec::new();
        let mut failures = Vec::new();

        for (index, name, compensation) in pending {
            let outcome = match compensation {
                Some(undo) => undo().await,
                None => Ok(()),
            };

            let mut state = self.inner.state.lock();
            let record = &mut state.steps[index].record;
            match outcome {
                Ok(()) => {
                    record.status = StepStatus::RolledBack;
                    drop(state);
                    self.inner.notifier.emit(Notification::StepRolledBack {
                        transaction: self.inner.name.clone(),
                        step: name.clone(),
                    });
                    rolled_back.push(name);
                }
                Err(err) => {
                    let message = format!("{:#}", err);
                    record.error = Some(message.clone());
                    drop(state);
                    tracing::warn!(
                        "Transaction {}: compensation for {} failed: {}",
                        self.inner.name,
                        name,
                        message
                    );
                    failures.push(CompensationFailure {
                        step: name,
                        error: message,
                    });
                }
            }
        }

        self.inner.state.lock().status = TransactionStatus::RolledBack;

        let success = failures.is_empty();
        if success {
            observe::record_transaction("rolled_back");
        } else {
            observe::record_transaction("rollback_incomplete");
            tracing::error!(
                "Transaction {} rollback incomplete: {} compensation(s) failed",
                self.inner.name,
                failures.len()
            );
        }
        self.inner
            .notifier
            .emit(Notification::TransactionRolledBack {
                transaction: self.inner.name.clone(),
                success,
            });

        Ok(RollbackReport {
            transaction: self.inner.name.clone(),
            success,
            rolled_back,
            failures,
            cause,
        })
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}
