//! Composition root
//!
//! Builds every component from one [`BulwarkConfig`] with a shared
//! [`Notifier`], so an application constructs its instances once at startup
//! and passes them where they are needed.

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::{
    BoundedCache, BulwarkConfig, Notification, Notifier, ResourceMonitor, ResumableProcessor,
    Result, RetryController, SystemProbe, Transaction, WriteQueue,
};
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// All components, wired to one notification channel.
///
/// Cloning is cheap; clones share every component.
#[derive(Clone)]
pub struct Bulwark {
    config: Arc<BulwarkConfig>,
    notifier: Notifier,
    retry: RetryController,
    write_queue: WriteQueue,
    resumable: ResumableProcessor,
    resources: ResourceMonitor,
}

impl Bulwark {
    /// Validate `config` and build the components, storing checkpoints
    /// under `config.resumable.checkpoint_dir`.
    pub fn new(config: BulwarkConfig) -> Result<Self> {
        let store = Arc::new(FileCheckpointStore::new(
            config.resumable.checkpoint_dir.clone(),
        ));
        Self::with_checkpoint_store(config, store)
    }

    /// Load, validate and build from a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BulwarkConfig::from_json_file(path)?)
    }

    /// Build with a custom checkpoint backend.
    pub fn with_checkpoint_store(
        config: BulwarkConfig,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        config.validate()?;
        let notifier = Notifier::new();

        let retry = RetryController::with_notifier(config.retry.clone(), notifier.clone());
        let write_queue = WriteQueue::with_notifier(config.write_queue.clone(), notifier.clone());
        let resumable =
            ResumableProcessor::with_store(config.resumable.clone(), store, notifier.clone());
        let resources = ResourceMonitor::with_probe(
            config.resources.clone(),
            Arc::new(SystemProbe),
            notifier.clone(),
        );

        tracing::info!(
            "Bulwark initialised (checkpoints: {} in {}, max concurrent writes: {})",
            resumable.store().storage_type(),
            config.resumable.checkpoint_dir.display(),
            config.write_queue.max_concurrent_writes
        );

        Ok(Self {
            config: Arc::new(config),
            notifier,
            retry,
            write_queue,
            resumable,
            resources,
        })
    }

    pub fn config(&self) -> &BulwarkConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Receive every notification published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    pub fn write_queue(&self) -> &WriteQueue {
        &self.write_queue
    }

    pub fn resumable(&self) -> &ResumableProcessor {
        &self.resumable
    }

    pub fn resources(&self) -> &ResourceMonitor {
        &self.resources
    }

    /// Start a transaction publishing on the shared channel.
    pub fn transaction(&self, name: impl Into<String>) -> Transaction {
        Transaction::with_notifier(name, self.notifier.clone())
    }

    /// Create a cache with the configured bounds.
    ///
    /// Each call returns an independent cache; keep one per kind of data.
    pub fn new_cache<K, V>(&self) -> BoundedCache<K, V>
    where
        K: Eq + Hash + Clone,
        V: Clone,
    {
        BoundedCache::new(self.config.cache.clone())
    }
}

impl std::fmt::Debug for Bulwark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulwark")
            .field("config", &self.config)
            .field("subscribers", &self.notifier.subscriber_count())
            .finish()
    }
}
