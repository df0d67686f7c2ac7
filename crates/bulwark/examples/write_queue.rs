//! Example: Serialized Writes
//!
//! Demonstrates queueing concurrent writes against a single-writer store.
//! Some writes hit simulated lock contention and are retried; a constraint
//! violation fails immediately.

use bulwark::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bulwark=debug".into()),
        )
        .init();

    tracing::info!("=== Write Queue Demo ===");

    let queue = WriteQueue::new(
        WriteQueueConfig::default().with_retry(
            RetryPolicy::default()
                .with_max_retries(3)
                .with_base_delay(Duration::from_millis(20)),
        ),
    );

    let mut events = queue.retry_controller().notifier().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Notification::RetryScheduled { attempt, kind, delay_ms } = event {
                tracing::info!("  retry #{} after {} ({}ms)", attempt, kind, delay_ms);
            }
        }
    });

    let mut writes = Vec::new();
    for slide in 1..=5u32 {
        let failures = Arc::new(AtomicU32::new(0));
        writes.push(queue.enqueue_write(move || {
            let failures = failures.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                // Every even slide sees the database locked once
                if slide % 2 == 0 && failures.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("database is locked");
                }
                if slide == 5 {
                    anyhow::bail!("UNIQUE constraint failed: slides.position");
                }
                Ok(format!("slide {} saved", slide))
            }
        }));
    }
    tracing::info!("Enqueued {} writes ({} pending)", writes.len(), queue.pending_writes());

    for write in writes {
        match write.await {
            Ok(message) => tracing::info!("{}", message),
            Err(e) => tracing::warn!("write failed [{}]: {}", e.kind(), e),
        }
    }

    queue.wait_idle().await;
    let stats = queue.stats();
    tracing::info!(
        "Done: {} completed, {} failed, {} active",
        stats.completed,
        stats.failed,
        stats.active
    );

    let metrics = queue.retry_controller().metrics().snapshot();
    tracing::info!(
        "Retry metrics: {} operations, {} retries, success rate {:.0}%",
        metrics.total,
        metrics.retries,
        metrics.success_rate() * 100.0
    );

    Ok(())
}
