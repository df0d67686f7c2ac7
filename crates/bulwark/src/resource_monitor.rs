//! Memory and disk monitoring with level-based degradation
//!
//! The monitor reads system figures through a [`ResourceProbe`], classifies
//! them into a [`ResourceLevel`] against configured thresholds, and maps the
//! level to reduced-cost operating parameters for heavy workloads.
//!
//! Measurement is advisory. A probe that fails yields `None` figures, which
//! classify as `Normal`, and [`ResourceMonitor::check_disk_space`] reports
//! space as available when it cannot measure it.

use crate::{
    DiskStatus, MemoryStatus, Notification, Notifier, ProcessMemory, ResourceLevel,
    ResourceMonitorConfig, ResourceSnapshot, ResourceThresholds,
};
use bulwark_core::observe;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Source of raw resource figures.
pub trait ResourceProbe: Send + Sync {
    fn memory(&self) -> anyhow::Result<MemoryStatus>;

    fn disk(&self, path: &Path) -> anyhow::Result<DiskStatus>;
}

/// Reads `/proc` for memory and `statvfs` (via `fs2`) for disk.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

impl SystemProbe {
    fn read_kib_fields(path: &str, fields: &[&str]) -> anyhow::Result<Vec<Option<u64>>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(fields
            .iter()
            .map(|field| parse_kib_field(&raw, field))
            .collect())
    }
}

/// Extract `Field:   1234 kB` from a `/proc` status file, in bytes.
fn parse_kib_field(raw: &str, field: &str) -> Option<u64> {
    raw.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kib * 1024)
    })
}

impl ResourceProbe for SystemProbe {
    fn memory(&self) -> anyhow::Result<MemoryStatus> {
        let system = Self::read_kib_fields("/proc/meminfo", &["MemTotal", "MemAvailable", "MemFree"])?;
        let total = system[0].ok_or_else(|| anyhow::anyhow!("MemTotal missing from /proc/meminfo"))?;
        let free = system[1]
            .or(system[2])
            .ok_or_else(|| anyhow::anyhow!("MemAvailable missing from /proc/meminfo"))?;

        let mut status = MemoryStatus::from_figures(total, free);
        if let Ok(process) = Self::read_kib_fields("/proc/self/status", &["VmRSS", "VmData"]) {
            status.process = ProcessMemory {
                rss_bytes: process[0],
                heap_bytes: process[1],
            };
        }
        Ok(status)
    }

    fn disk(&self, path: &Path) -> anyhow::Result<DiskStatus> {
        let total = fs2::total_space(path)?;
        let free = fs2::available_space(path)?;
        Ok(DiskStatus::from_figures(path, total, free))
    }
}

/// Classify a snapshot. Missing figures count as healthy.
pub fn classify(thresholds: &ResourceThresholds, snapshot: &ResourceSnapshot) -> ResourceLevel {
    let memory = snapshot
        .memory
        .as_ref()
        .map(|m| {
            if m.free_bytes < thresholds.memory_critical_free_bytes
                || m.usage_percent > thresholds.memory_critical_percent
            {
                ResourceLevel::Critical
            } else if m.free_bytes < thresholds.memory_warning_free_bytes
                || m.usage_percent > thresholds.memory_warning_percent
            {
                ResourceLevel::Warning
            } else {
                ResourceLevel::Normal
            }
        })
        .unwrap_or(ResourceLevel::Normal);

    let disk = snapshot
        .disk
        .as_ref()
        .map(|d| {
            if d.free_bytes < thresholds.disk_critical_free_bytes {
                ResourceLevel::Critical
            } else if d.free_bytes < thresholds.disk_warning_free_bytes {
                ResourceLevel::Warning
            } else {
                ResourceLevel::Normal
            }
        })
        .unwrap_or(ResourceLevel::Normal);

    memory.max(disk)
}

/// Heavy workloads whose parameters follow the resource level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadCategory {
    ImageProcessing,
    Ocr,
    BatchImport,
}

/// Operating parameters for a workload at a given level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationStrategy {
    pub max_concurrency: usize,
    pub batch_size: usize,
    /// Output quality in percent, where the workload has a notion of quality
    pub quality: u8,
    pub delay_between_batches_ms: u64,
    /// False when the workload should be postponed entirely
    pub enabled: bool,
}

impl DegradationStrategy {
    const fn new(max_concurrency: usize, batch_size: usize, quality: u8, delay_ms: u64) -> Self {
        Self {
            max_concurrency,
            batch_size,
            quality,
            delay_between_batches_ms: delay_ms,
            enabled: true,
        }
    }

    const fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }

    pub fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches_ms)
    }
}

/// Static lookup of operating parameters by workload and level.
pub fn degradation_strategy(category: WorkloadCategory, level: ResourceLevel) -> DegradationStrategy {
    use ResourceLevel::*;
    use WorkloadCategory::*;

    match (category, level) {
        (ImageProcessing, Normal) => DegradationStrategy::new(4, 10, 90, 0),
        (ImageProcessing, Warning) => DegradationStrategy::new(2, 5, 75, 100),
        (ImageProcessing, Critical) => DegradationStrategy::new(1, 1, 60, 500),
        (Ocr, Normal) => DegradationStrategy::new(2, 5, 100, 0),
        (Ocr, Warning) => DegradationStrategy::new(1, 2, 100, 250),
        (Ocr, Critical) => DegradationStrategy::new(1, 1, 100, 1000).disabled(),
        (BatchImport, Normal) => DegradationStrategy::new(4, 50, 100, 0),
        (BatchImport, Warning) => DegradationStrategy::new(2, 20, 100, 100),
        (BatchImport, Critical) => DegradationStrategy::new(1, 5, 100, 500),
    }
}

/// Result of [`ResourceMonitor::check_disk_space`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpaceCheck {
    pub available: bool,
    /// `None` when free space could not be measured
    pub free_bytes: Option<u64>,
    pub required_bytes: u64,
    /// Bytes missing, zero when available
    pub deficit_bytes: u64,
}

struct MonitorInner {
    config: ResourceMonitorConfig,
    probe: Arc<dyn ResourceProbe>,
    level: Mutex<ResourceLevel>,
    notifier: Notifier,
}

/// Cloneable resource monitor. Clones share the recorded level.
#[derive(Clone)]
pub struct ResourceMonitor {
    inner: Arc<MonitorInner>,
}

impl ResourceMonitor {
    /// Monitor backed by [`SystemProbe`].
    pub fn new(config: ResourceMonitorConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemProbe), Notifier::new())
    }

    pub fn with_probe(
        config: ResourceMonitorConfig,
        probe: Arc<dyn ResourceProbe>,
        notifier: Notifier,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                probe,
                level: Mutex::new(ResourceLevel::Normal),
                notifier,
            }),
        }
    }

    pub fn config(&self) -> &ResourceMonitorConfig {
        &self.inner.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn memory_status(&self) -> Option<MemoryStatus> {
        match self.inner.probe.memory() {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!("Memory measurement failed: {}", e);
                None
            }
        }
    }

    pub fn disk_status(&self, path: impl AsRef<Path>) -> Option<DiskStatus> {
        let path = path.as_ref();
        match self.inner.probe.disk(path) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!("Disk measurement failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Fresh memory figures plus the configured disk path, if any.
    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            memory: self.memory_status(),
            disk: self
                .inner
                .config
                .disk_path
                .as_ref()
                .and_then(|path| self.disk_status(path)),
            taken_at: Utc::now(),
        }
    }

    pub fn classify(&self, snapshot: &ResourceSnapshot) -> ResourceLevel {
        classify(&self.inner.config.thresholds, snapshot)
    }

    /// Classify a fresh snapshot without recording it.
    pub fn assess_resource_level(&self) -> ResourceLevel {
        self.classify(&self.snapshot())
    }

    /// Level recorded by the last [`ResourceMonitor::poll`].
    pub fn current_level(&self) -> ResourceLevel {
        *self.inner.level.lock()
    }

    /// Take a snapshot, record its level, and publish
    /// [`Notification::ResourceLevelChanged`] if the level moved.
    pub fn poll(&self) -> ResourceLevel {
        let snapshot = self.snapshot();
        let new = self.classify(&snapshot);
        let old = std::mem::replace(&mut *self.inner.level.lock(), new);
        observe::set_resource_level(new);

        if old != new {
            if new > old {
                tracing::warn!("Resource level changed: {} -> {}", old, new);
            } else {
                tracing::info!("Resource level changed: {} -> {}", old, new);
            }
            self.inner
                .notifier
                .emit(Notification::ResourceLevelChanged { old, new, snapshot });
        }
        new
    }

    /// Parameters for `category` at the currently recorded level.
    pub fn degradation_strategy(&self, category: WorkloadCategory) -> DegradationStrategy {
        degradation_strategy(category, self.current_level())
    }

    /// Whether `required_bytes` fit on the volume holding `path`.
    pub fn check_disk_space(&self, path: impl AsRef<Path>, required_bytes: u64) -> DiskSpaceCheck {
        match self.disk_status(path) {
            Some(disk) => {
                let deficit_bytes = required_bytes.saturating_sub(disk.free_bytes);
                DiskSpaceCheck {
                    available: deficit_bytes == 0,
                    free_bytes: Some(disk.free_bytes),
                    required_bytes,
                    deficit_bytes,
                }
            }
            None => DiskSpaceCheck {
                available: true,
                free_bytes: None,
                required_bytes,
                deficit_bytes: 0,
            },
        }
    }

    /// Poll every `interval` on a background task until the handle is
    /// stopped. The first poll happens immediately.
    pub fn start_monitoring(&self, interval: Duration) -> MonitorHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let monitor = self.clone();
        let every = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            tracing::info!("Resource monitoring started (interval: {:?})", every);
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                monitor.poll();
            }
            tracing::info!("Resource monitoring stopped");
        });

        MonitorHandle { shutdown, handle }
    }

    /// Like [`ResourceMonitor::start_monitoring`] at the configured
    /// `poll_interval_ms`.
    pub fn start_monitoring_default(&self) -> MonitorHandle {
        self.start_monitoring(self.inner.config.poll_interval())
    }

    /// Configured disk path, if any.
    pub fn disk_path(&self) -> Option<&Path> {
        self.inner.config.disk_path.as_deref()
    }
}

/// Handle for stopping background monitoring
///
/// Monitoring stops when the handle is dropped.
#[must_use = "monitoring stops when the handle is dropped"]
pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;

    struct FixedProbe {
        memory: Mutex<Option<MemoryStatus>>,
        disk_free: Option<u64>,
    }

    impl FixedProbe {
        fn new(total: u64, free: u64) -> Self {
            Self {
                memory: Mutex::new(Some(MemoryStatus::from_figures(total, free))),
                disk_free: None,
            }
        }

        fn set_free(&self, total: u64, free: u64) {
            *self.memory.lock() = Some(MemoryStatus::from_figures(total, free));
        }
    }

    impl ResourceProbe for FixedProbe {
        fn memory(&self) -> anyhow::Result<MemoryStatus> {
            self.memory
                .lock()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("unavailable"))
        }

        fn disk(&self, path: &Path) -> anyhow::Result<DiskStatus> {
            let free = self.disk_free.ok_or_else(|| anyhow::anyhow!("unavailable"))?;
            Ok(DiskStatus::from_figures(path, 100 * GIB, free))
        }
    }

    fn monitor(probe: Arc<FixedProbe>) -> ResourceMonitor {
        ResourceMonitor::with_probe(ResourceMonitorConfig::default(), probe, Notifier::new())
    }

    #[test]
    fn test_memory_levels() {
        let probe = Arc::new(FixedProbe::new(16 * GIB, 8 * GIB));
        let monitor = monitor(probe.clone());
        assert_eq!(monitor.assess_resource_level(), ResourceLevel::Normal);

        probe.set_free(16 * GIB, 400 * MIB);
        assert_eq!(monitor.assess_resource_level(), ResourceLevel::Warning);

        probe.set_free(16 * GIB, 100 * MIB);
        assert_eq!(monitor.assess_resource_level(), ResourceLevel::Critical);
    }

    #[test]
    fn test_usage_percent_alone_triggers() {
        // 4% free of 64 GiB is still above both absolute floors
        let probe = Arc::new(FixedProbe::new(64 * GIB, 64 * GIB / 25));
        assert_eq!(monitor(probe).assess_resource_level(), ResourceLevel::Critical);
    }

    #[test]
    fn test_unmeasurable_is_normal() {
        let probe = Arc::new(FixedProbe::new(0, 0));
        *probe.memory.lock() = None;
        let monitor = monitor(probe);
        assert!(monitor.memory_status().is_none());
        assert_eq!(monitor.assess_resource_level(), ResourceLevel::Normal);

        let check = monitor.check_disk_space("/data", 10 * GIB);
        assert!(check.available);
        assert_eq!(check.free_bytes, None);
    }

    #[test]
    fn test_disk_folds_into_level() {
        let probe = Arc::new(FixedProbe {
            memory: Mutex::new(Some(MemoryStatus::from_figures(16 * GIB, 8 * GIB))),
            disk_free: Some(700 * MIB),
        });
        let monitor = ResourceMonitor::with_probe(
            ResourceMonitorConfig::default().with_disk_path("/data"),
            probe,
            Notifier::new(),
        );
        assert_eq!(monitor.assess_resource_level(), ResourceLevel::Warning);

        let check = monitor.check_disk_space("/data", GIB);
        assert!(!check.available);
        assert_eq!(check.deficit_bytes, GIB - 700 * MIB);
    }

    #[test]
    fn test_poll_emits_on_change_only() {
        let probe = Arc::new(FixedProbe::new(16 * GIB, 8 * GIB));
        let monitor = monitor(probe.clone());
        let mut rx = monitor.notifier().subscribe();

        assert_eq!(monitor.poll(), ResourceLevel::Normal);
        assert!(rx.try_recv().is_err());

        probe.set_free(16 * GIB, 100 * MIB);
        assert_eq!(monitor.poll(), ResourceLevel::Critical);
        assert_eq!(monitor.current_level(), ResourceLevel::Critical);
        match rx.try_recv().unwrap() {
            Notification::ResourceLevelChanged { old, new, snapshot } => {
                assert_eq!(old, ResourceLevel::Normal);
                assert_eq!(new, ResourceLevel::Critical);
                assert_eq!(snapshot.memory.unwrap().free_bytes, 100 * MIB);
            }
            other => panic!("unexpected notification: {:?}", other),
        }

        monitor.poll();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_degradation_follows_level() {
        let probe = Arc::new(FixedProbe::new(16 * GIB, 100 * MIB));
        let monitor = monitor(probe);
        let normal = monitor.degradation_strategy(WorkloadCategory::Ocr);
        assert!(normal.enabled);

        monitor.poll();
        let critical = monitor.degradation_strategy(WorkloadCategory::Ocr);
        assert!(!critical.enabled);

        let reduced = degradation_strategy(WorkloadCategory::ImageProcessing, ResourceLevel::Warning);
        let full = degradation_strategy(WorkloadCategory::ImageProcessing, ResourceLevel::Normal);
        assert!(reduced.quality < full.quality);
        assert!(reduced.max_concurrency < full.max_concurrency);
    }

    #[test]
    fn test_parse_kib_field() {
        let raw = "MemTotal:       16318472 kB\nMemFree:          812344 kB\nMemAvailable:    9232744 kB\n";
        assert_eq!(parse_kib_field(raw, "MemTotal"), Some(16318472 * 1024));
        assert_eq!(parse_kib_field(raw, "MemAvailable"), Some(9232744 * 1024));
        assert_eq!(parse_kib_field(raw, "Mem"), None);
        assert_eq!(parse_kib_field(raw, "SwapTotal"), None);
    }

    #[tokio::test]
    async fn test_start_monitoring_publishes() {
        let probe = Arc::new(FixedProbe::new(16 * GIB, 100 * MIB));
        let monitor = monitor(probe);
        let mut rx = monitor.notifier().subscribe();

        let handle = monitor.start_monitoring(Duration::from_millis(5));
        let notification = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.stop();

        assert!(matches!(
            notification,
            Notification::ResourceLevelChanged {
                new: ResourceLevel::Critical,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_start_monitoring_default_uses_configured_interval() {
        let probe = Arc::new(FixedProbe::new(16 * GIB, 100 * MIB));
        let monitor = ResourceMonitor::with_probe(
            ResourceMonitorConfig::default().with_poll_interval(Duration::from_millis(5)),
            probe.clone(),
            Notifier::new(),
        );
        let mut rx = monitor.notifier().subscribe();

        let handle = monitor.start_monitoring_default();
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        // Only a second poll can observe the recovery
        probe.set_free(16 * GIB, 8 * GIB);
        let recovered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.stop();

        assert!(matches!(
            recovered,
            Notification::ResourceLevelChanged {
                new: ResourceLevel::Normal,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_monitoring() {
        let probe = Arc::new(FixedProbe::new(16 * GIB, 100 * MIB));
        let monitor = monitor(probe.clone());
        let mut rx = monitor.notifier().subscribe();

        let handle = monitor.start_monitoring(Duration::from_millis(5));
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        drop(handle);

        probe.set_free(16 * GIB, 8 * GIB);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.current_level(), ResourceLevel::Critical);
    }
}
