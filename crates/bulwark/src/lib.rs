//! Bulwark: resilience primitives for an application that writes to a
//! single-writer embedded database and a remote backend
//!
//! Bulwark provides:
//! - **Retry controller**: classifies failures and retries transient
//!   contention with capped exponential or linear backoff
//! - **Write queue**: FIFO admission that keeps at most N writes in flight
//! - **Transactions**: eager steps with compensations, rolled back in
//!   reverse order on failure
//! - **Resumable tasks**: checkpointed long operations that survive retries
//!   and restarts
//! - **Resource monitor**: memory/disk levels and degradation parameters
//! - **Bounded cache**: LRU cache limited by entry count, bytes and TTL
//!
//! # Quick Start
//!
//! ```no_run
//! use bulwark::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let bulwark = Bulwark::new(BulwarkConfig::default())?;
//!
//! // Serialize a write against the embedded database
//! let rows = bulwark
//!     .write_queue()
//!     .enqueue_write(|| async { Ok::<_, anyhow::Error>(1) })
//!     .await?;
//!
//! // Watch what the components are doing
//! let mut events = bulwark.subscribe();
//! # let _ = (rows, events.try_recv());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cancel;
pub mod checkpoint;
pub mod prelude;
pub mod resource_monitor;
pub mod resumable;
pub mod retry;
pub mod toolkit;
pub mod transaction;
pub mod write_queue;

// Re-export core types
pub use bulwark_core::{
    config::{
        BackoffMode, BulwarkConfig, CacheConfig, ResourceMonitorConfig, ResourceThresholds,
        ResumableConfig, RetryPolicy, WriteQueueConfig,
    },
    error::{BulwarkError, CompensationFailure, ErrorKind, Result},
    events::{Notification, Notifier},
    types::{DiskStatus, MemoryStatus, ProcessMemory, ResourceLevel, ResourceSnapshot},
};

// Re-export main types from this crate
pub use cache::{BoundedCache, CacheStats, SizeEstimate};
pub use cancel::CancellationToken;
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use resource_monitor::{
    DegradationStrategy, DiskSpaceCheck, MonitorHandle, ResourceMonitor, ResourceProbe,
    SystemProbe, WorkloadCategory,
};
pub use resumable::{
    ActiveTask, ProcessOptions, ResumableProcessor, ResumePoint, SweepHandle, TaskContext,
};
pub use retry::{RetryController, RetryMetrics, RetryMetricsSnapshot};
pub use toolkit::Bulwark;
pub use transaction::{
    RollbackReport, StepRecord, StepStatus, Transaction, TransactionStatus,
};
pub use write_queue::{WriteQueue, WriteQueueStats};
