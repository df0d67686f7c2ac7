//! Bulwark Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use bulwark::prelude::*;
//! ```

// Core types
pub use crate::{Bulwark, BulwarkError, ErrorKind, Notification, Notifier, Result};

// Configs
pub use crate::{
    BackoffMode, BulwarkConfig, CacheConfig, ResourceMonitorConfig, ResourceThresholds,
    ResumableConfig, RetryPolicy, WriteQueueConfig,
};

// Retry and write serialization
pub use crate::{RetryController, WriteQueue};

// Transactions
pub use crate::{Transaction, TransactionStatus};

// Resumable tasks
pub use crate::{
    CancellationToken, Checkpoint, CheckpointStore, ProcessOptions, ResumableProcessor,
    TaskContext,
};

// Resources and caching
pub use crate::{BoundedCache, ResourceLevel, ResourceMonitor, SizeEstimate, WorkloadCategory};

// Re-export common external deps
pub use anyhow;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use tracing;
