//! Structured notifications published by the components.
//!
//! Components never call observers directly. They publish [`Notification`]
//! records on a [`Notifier`], which fans them out over a
//! `tokio::sync::broadcast` channel. Publishing with no subscribers is a
//! no-op, and a slow subscriber only loses its own backlog.

use crate::error::ErrorKind;
use crate::types::{ResourceLevel, ResourceSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default number of notifications buffered per subscriber.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// Events emitted by the components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Notification {
    /// A retryable failure occurred and the controller is about to wait.
    RetryScheduled {
        /// 1-based number of the attempt that failed.
        attempt: u32,
        kind: ErrorKind,
        delay_ms: u64,
    },
    /// An operation succeeded, possibly after retries.
    OperationSucceeded { attempts: u32 },
    WriteEnqueued { write_id: u64, pending: usize },
    WriteAdmitted { write_id: u64, active: usize },
    WriteSettled { write_id: u64, success: bool },
    CheckpointSaved { task_id: String, progress: f64 },
    TaskResumed { task_id: String, progress: f64 },
    TaskRetry {
        task_id: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    TaskCompleted { task_id: String, attempts: u32 },
    TaskFailed {
        task_id: String,
        attempts: u32,
        error: String,
    },
    TaskCancelled { task_id: String, progress: f64 },
    StepStarted { transaction: String, step: String },
    StepCompleted { transaction: String, step: String },
    StepFailed {
        transaction: String,
        step: String,
        error: String,
    },
    StepRolledBack { transaction: String, step: String },
    TransactionCommitted { transaction: String, steps: usize },
    TransactionRolledBack {
        transaction: String,
        success: bool,
    },
    ResourceLevelChanged {
        old: ResourceLevel,
        new: ResourceLevel,
        snapshot: ResourceSnapshot,
    },
}

/// Cloneable handle used by components to publish notifications.
#[derive(Clone, Debug)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notification to all current subscribers.
    pub fn emit(&self, notification: Notification) {
        // Err only means nobody is listening.
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let notifier = Notifier::new();
        notifier.emit(Notification::OperationSucceeded { attempts: 1 });
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.emit(Notification::WriteEnqueued {
            write_id: 1,
            pending: 1,
        });
        notifier.emit(Notification::WriteAdmitted {
            write_id: 1,
            active: 1,
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::WriteEnqueued {
                write_id: 1,
                pending: 1
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            Notification::WriteAdmitted { write_id: 1, .. }
        ));
    }

    #[test]
    fn test_notification_serializes_tagged() {
        let json = serde_json::to_value(Notification::TaskResumed {
            task_id: "import".into(),
            progress: 80.0,
        })
        .unwrap();
        assert_eq!(json["type"], "TaskResumed");
        assert_eq!(json["progress"], 80.0);
    }
}
