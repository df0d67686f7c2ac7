//! Durable task checkpoints with pluggable storage backends
//!
//! A checkpoint records how far a long-running task got, so a later run can
//! resume instead of starting over. There is at most one checkpoint per task.
//!
//! # Example
//!
//! ```no_run
//! use bulwark::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
//! use bulwark::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let store = FileCheckpointStore::new("./checkpoints");
//! store.save(&Checkpoint::new("import/deck-7", 40.0)).await?;
//!
//! let resumed = store.load("import/deck-7").await?;
//! assert_eq!(resumed.map(|c| c.progress), Some(40.0));
//!
//! // Or implement your own storage backend
//! // struct SqliteCheckpoints { /* ... */ }
//! // impl CheckpointStore for SqliteCheckpoints { /* ... */ }
//! # Ok(())
//! # }
//! ```

use crate::{BulwarkError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Suffix of checkpoint files written by [`FileCheckpointStore`].
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Persisted progress of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    /// Percentage in `0.0..=100.0`
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
    /// Opaque state the task needs to resume
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Last error, present on checkpoints written after a terminal failure
    #[serde(default)]
    pub error: Option<String>,
    /// Attempt that wrote this checkpoint
    #[serde(default)]
    pub attempt: u32,
}

impl Checkpoint {
    pub fn new(task_id: impl Into<String>, progress: f64) -> Self {
        Self {
            task_id: task_id.into(),
            progress: if progress.is_nan() {
                0.0
            } else {
                progress.clamp(0.0, 100.0)
            },
            timestamp: Utc::now(),
            data: None,
            error: None,
            attempt: 0,
        }
    }

    pub fn with_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Age relative to now, zero if the timestamp is in the future.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or_default()
    }
}

/// Trait for checkpoint storage backends
///
/// Implement this trait to keep checkpoints somewhere other than the local
/// filesystem (an embedded database table, a key-value store, etc.)
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Create or overwrite the checkpoint for `checkpoint.task_id`.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint for `task_id`, if one exists.
    async fn load(&self, task_id: &str) -> Result<Option<Checkpoint>>;

    /// Delete the checkpoint for `task_id`. Returns whether one existed.
    async fn delete(&self, task_id: &str) -> Result<bool>;

    /// List all stored checkpoints, newest first.
    async fn list(&self) -> Result<Vec<Checkpoint>>;

    /// Delete checkpoints whose timestamp is older than `max_age`.
    ///
    /// Returns the number deleted.
    async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        for checkpoint in self.list().await? {
            if checkpoint.age() > max_age && self.delete(&checkpoint.task_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Get the storage type identifier
    fn storage_type(&self) -> &str;
}

/// Replace every character that is not ASCII alphanumeric with `_`.
pub fn sanitize_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Local filesystem storage backend
///
/// Layout: `<dir>/<sanitized task id>.checkpoint.json`. Writes go to a
/// temporary file first and are renamed into place, so a crash mid-write
/// leaves the previous checkpoint intact.
pub struct FileCheckpointStore {
    base_path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the checkpoint file for `task_id`.
    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.base_path
            .join(format!("{}{}", sanitize_task_id(task_id), CHECKPOINT_SUFFIX))
    }

    fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            BulwarkError::Serialization(format!("{}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        // JSON has no NaN; writing one would replace a readable checkpoint
        if !checkpoint.progress.is_finite() {
            return Err(BulwarkError::InvalidState(format!(
                "checkpoint for {} has non-finite progress",
                checkpoint.task_id
            )));
        }
        std::fs::create_dir_all(&self.base_path)?;

        let path = self.path_for(&checkpoint.task_id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;

        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(task_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_checkpoint(&path).map(Some)
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        let path = self.path_for(task_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();

        if !self.base_path.exists() {
            return Ok(checkpoints);
        }

        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CHECKPOINT_SUFFIX));
            if !is_checkpoint {
                continue;
            }

            match Self::read_checkpoint(&path) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => tracing::warn!("Skipping unreadable checkpoint: {}", e),
            }
        }

        // Sort by timestamp (newest first)
        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(checkpoints)
    }

    async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        if !self.base_path.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CHECKPOINT_SUFFIX));
            if !is_checkpoint {
                continue;
            }

            // Unreadable files are judged by modification time instead.
            let expired = match Self::read_checkpoint(&path) {
                Ok(checkpoint) => checkpoint.age() > max_age,
                Err(_) => std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .is_some_and(|age| age > max_age),
            };

            if expired {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(
                "Removed {} checkpoint(s) older than {:?} from {}",
                removed,
                max_age,
                self.base_path.display()
            );
        }
        Ok(removed)
    }

    fn storage_type(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_task_id() {
        assert_eq!(sanitize_task_id("import/deck 7.pptx"), "import_deck_7_pptx");
        assert_eq!(sanitize_task_id("abc123"), "abc123");
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(Checkpoint::new("t", 140.0).progress, 100.0);
        assert_eq!(Checkpoint::new("t", -3.0).progress, 0.0);
        assert_eq!(Checkpoint::new("t", f64::NAN).progress, 0.0);
        assert_eq!(Checkpoint::new("t", f64::INFINITY).progress, 100.0);
    }

    #[tokio::test]
    async fn test_save_refuses_non_finite_progress() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileCheckpointStore::new(temp_dir.path());
        store.save(&Checkpoint::new("deck", 40.0)).await?;

        let mut bad = Checkpoint::new("deck", 0.0);
        bad.progress = f64::NAN;
        assert!(matches!(
            store.save(&bad).await,
            Err(BulwarkError::InvalidState(_))
        ));
        assert_eq!(store.load("deck").await?.map(|c| c.progress), Some(40.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileCheckpointStore::new(temp_dir.path().join("checkpoints"));

        assert!(store.load("deck:1").await?.is_none());
        assert!(store.list().await?.is_empty());

        let checkpoint = Checkpoint::new("deck:1", 30.0)
            .with_data(Some(serde_json::json!({"slide": 12})))
            .with_attempt(1);
        store.save(&checkpoint).await?;

        let path = store.path_for("deck:1");
        assert!(path.ends_with("deck_1.checkpoint.json"));
        assert!(path.exists());

        let loaded = store.load("deck:1").await?.unwrap();
        assert_eq!(loaded, checkpoint);

        // Overwrite
        store.save(&Checkpoint::new("deck:1", 60.0)).await?;
        assert_eq!(store.load("deck:1").await?.unwrap().progress, 60.0);
        assert_eq!(store.list().await?.len(), 1);

        assert!(store.delete("deck:1").await?);
        assert!(!store.delete("deck:1").await?);
        assert!(store.load("deck:1").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_older_than() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileCheckpointStore::new(temp_dir.path());

        let mut stale = Checkpoint::new("stale", 50.0);
        stale.timestamp = Utc::now() - chrono::Duration::hours(2);
        store.save(&stale).await?;
        store.save(&Checkpoint::new("fresh", 20.0)).await?;

        // Foreign files are left alone
        std::fs::write(temp_dir.path().join("notes.txt"), b"keep")?;

        let removed = store.cleanup_older_than(Duration::from_secs(3600)).await?;
        assert_eq!(removed, 1);

        let remaining = store.list().await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task_id, "fresh");
        assert!(temp_dir.path().join("notes.txt").exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileCheckpointStore::new(temp_dir.path());
        std::fs::write(store.path_for("broken"), b"{not json")?;

        assert!(matches!(
            store.load("broken").await,
            Err(BulwarkError::Serialization(_))
        ));
        // list skips it
        assert!(store.list().await?.is_empty());
        Ok(())
    }
}
