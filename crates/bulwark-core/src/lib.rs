//! Bulwark Core: shared types for the bulwark resilience toolkit
//!
//! This crate defines what the components of `bulwark` have in common:
//! - Error taxonomy: classification of storage failures into retryable
//!   contention and structural faults
//! - Configuration: serde-loadable settings with documented defaults
//! - Notifications: structured records broadcast to interested observers
//! - Resource types: memory/disk snapshots and health levels
//! - Observability: optional `metrics` instrumentation

pub mod config;
pub mod error;
pub mod events;
pub mod observe;
pub mod types;

pub use config::{
    BackoffMode, BulwarkConfig, CacheConfig, ResourceMonitorConfig, ResourceThresholds,
    ResumableConfig, RetryPolicy, WriteQueueConfig,
};
pub use error::{BulwarkError, CompensationFailure, ErrorKind, Result};
pub use events::{Notification, Notifier};
pub use types::{DiskStatus, MemoryStatus, ProcessMemory, ResourceLevel, ResourceSnapshot};
