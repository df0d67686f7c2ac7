//! End-to-end behaviour of the components working against real timers and
//! a temporary checkpoint directory.

use bulwark::prelude::*;
use bulwark::resource_monitor::ResourceProbe;
use bulwark::{DiskStatus, MemoryStatus, StepStatus};
use parking_lot::Mutex;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_exponential_backoff_is_monotonic_and_capped() {
    let policy = RetryPolicy::default().with_jitter(false);
    let delays: Vec<_> = (0..12).map(|attempt| policy.delay_for(attempt)).collect();

    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(delays.iter().all(|d| *d <= policy.max_delay()));
    assert_eq!(*delays.last().unwrap(), policy.max_delay());
}

#[tokio::test]
async fn test_serialized_writes_never_overlap() {
    let queue = WriteQueue::new(WriteQueueConfig::default());
    let spans: Arc<Mutex<Vec<(usize, Instant, Instant)>>> = Arc::default();

    let mut pending = Vec::new();
    for i in 0..5 {
        let spans = spans.clone();
        pending.push(queue.enqueue_write(move || {
            let spans = spans.clone();
            async move {
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(5)).await;
                spans.lock().push((i, start, Instant::now()));
                Ok::<_, anyhow::Error>(i)
            }
        }));
    }
    for (i, write) in pending.into_iter().enumerate() {
        assert_eq!(write.await.unwrap(), i);
    }

    let spans = spans.lock();
    let order: Vec<_> = spans.iter().map(|(i, _, _)| *i).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    for pair in spans.windows(2) {
        assert!(pair[0].2 <= pair[1].1, "writes {} and {} overlap", pair[0].0, pair[1].0);
    }
}

#[tokio::test]
async fn test_three_writes_settle_in_order() {
    let queue = WriteQueue::new(WriteQueueConfig::default());

    let w1 = queue.enqueue_write(|| async { Ok::<_, anyhow::Error>("W1") });
    let w2 = queue.enqueue_write(|| async { Ok::<_, anyhow::Error>("W2") });
    let w3 = queue.enqueue_write(|| async { Ok::<_, anyhow::Error>("W3") });

    let results = vec![w1.await.unwrap(), w2.await.unwrap(), w3.await.unwrap()];
    assert_eq!(results, vec!["W1", "W2", "W3"]);

    queue.wait_idle().await;
    assert_eq!(queue.active_writes(), 0);
    assert_eq!(queue.stats().completed, 3);
}

#[tokio::test]
async fn test_failed_step_rolls_back_completed_steps_in_reverse() {
    let undone: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let tx = Transaction::new("create-presentation");

    for name in ["A", "B"] {
        let undone = undone.clone();
        tx.step_with_compensation(
            name,
            || async { Ok(()) },
            move |_| async move {
                undone.lock().push(name);
                Ok(())
            },
        )
        .await
        .unwrap();
    }

    let c_undone = undone.clone();
    let failed = tx
        .step_with_compensation(
            "C",
            || async { Err::<(), _>(anyhow::anyhow!("backend rejected record")) },
            move |_| async move {
                c_undone.lock().push("C");
                Ok(())
            },
        )
        .await;
    assert!(matches!(failed, Err(BulwarkError::StepFailed { .. })));

    let report = tx.rollback().await.unwrap();
    assert!(report.success);
    assert_eq!(*undone.lock(), vec!["B", "A"]);
    assert_eq!(tx.status(), TransactionStatus::RolledBack);
    assert_eq!(tx.steps()[2].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_restart_resumes_from_last_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = ResumableConfig::new(dir.path()).with_retry_base_delay(Duration::from_millis(1));

    // First run dies after reporting 90%
    let first = ResumableProcessor::new(config.clone());
    let result: Result<()> = first
        .process_with_retry(
            "deck-42",
            |_, ctx| async move {
                for p in (10..=90).step_by(10) {
                    ctx.report_progress(p as f64).await?;
                }
                Err::<(), _>(anyhow::anyhow!("process killed"))
            },
            ProcessOptions::default().with_max_attempts(1),
        )
        .await;
    assert!(matches!(result, Err(BulwarkError::TaskFailed { .. })));

    let saved = first.checkpoint("deck-42").await.unwrap().unwrap();
    assert!(saved.progress >= 80.0);

    // A fresh processor stands in for the restarted process
    let second = ResumableProcessor::new(config);
    let resumed_at = second
        .process_with_retry(
            "deck-42",
            |resume, ctx| async move {
                assert!(resume.from_checkpoint);
                ctx.report_progress(100.0).await?;
                Ok::<_, anyhow::Error>(resume.progress)
            },
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    assert!(resumed_at >= 80.0);
    assert!(second.checkpoint("deck-42").await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_process_retries_do_not_regress_progress() {
    let dir = TempDir::new().unwrap();
    let processor = ResumableProcessor::new(
        ResumableConfig::new(dir.path()).with_retry_base_delay(Duration::from_millis(1)),
    );
    let starts: Arc<Mutex<Vec<f64>>> = Arc::default();

    let s = starts.clone();
    processor
        .process_with_retry(
            "ocr-7",
            move |resume, ctx| {
                let s = s.clone();
                async move {
                    s.lock().push(resume.progress);
                    let mut progress = resume.progress;
                    while progress < 100.0 {
                        progress += 7.0;
                        ctx.report_progress(progress.min(100.0)).await?;
                        // Each attempt fails once it has made 21 points of headway
                        if progress - resume.progress >= 21.0 && resume.attempt < 3 {
                            anyhow::bail!("database is locked");
                        }
                    }
                    Ok::<(), anyhow::Error>(())
                }
            },
            ProcessOptions::default(),
        )
        .await
        .unwrap();

    let starts = starts.lock();
    assert_eq!(starts.len(), 3);
    assert!(starts.windows(2).all(|w| w[0] < w[1]), "{:?}", *starts);
    assert_eq!(*starts, vec![0.0, 21.0, 42.0]);
}

#[tokio::test]
async fn test_cache_evicts_lru_and_expires_by_ttl() {
    let cache: BoundedCache<&'static str, Vec<u8>> = BoundedCache::new(
        CacheConfig::new()
            .with_max_bytes(30)
            .with_ttl(Duration::from_millis(30)),
    );

    cache.insert("a", vec![0; 10]);
    cache.insert("b", vec![0; 10]);
    cache.insert("c", vec![0; 10]);
    cache.get(&"a");

    // b is least recently used
    cache.insert("d", vec![0; 10]);
    assert!(cache.get(&"b").is_none());
    assert!(cache.get(&"a").is_some());
    assert!(cache.total_bytes() <= 30);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.get(&"a").is_none());
    assert!(cache.get(&"d").is_none());
}

struct SyntheticProbe {
    free: Mutex<u64>,
}

impl ResourceProbe for SyntheticProbe {
    fn memory(&self) -> anyhow::Result<MemoryStatus> {
        Ok(MemoryStatus::from_figures(8 << 30, *self.free.lock()))
    }

    fn disk(&self, path: &Path) -> anyhow::Result<DiskStatus> {
        Ok(DiskStatus::from_figures(path, 100 << 30, 50 << 30))
    }
}

#[tokio::test]
async fn test_memory_below_critical_floor_is_critical() {
    let probe = Arc::new(SyntheticProbe {
        free: Mutex::new(100 << 20),
    });
    let monitor = ResourceMonitor::with_probe(
        ResourceMonitorConfig::default(),
        probe.clone(),
        Notifier::new(),
    );
    let mut rx = monitor.notifier().subscribe();

    assert_eq!(monitor.poll(), ResourceLevel::Critical);
    *probe.free.lock() = 4 << 30;
    assert_eq!(monitor.poll(), ResourceLevel::Normal);

    let changes: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|n| match n {
            Notification::ResourceLevelChanged { old, new, .. } => Some((old, new)),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec![
            (ResourceLevel::Normal, ResourceLevel::Critical),
            (ResourceLevel::Critical, ResourceLevel::Normal)
        ]
    );
}
