//! Example: Resumable Import
//!
//! Converts a 20-slide deck with checkpoints every 10%. The first run is
//! cancelled halfway through; the second run resumes from the checkpoint
//! instead of starting over. A transaction then registers the result in a
//! remote and a local store, compensating the remote record when the local
//! insert fails.

use bulwark::prelude::*;
use std::time::Duration;

const SLIDES: u32 = 20;

async fn convert_deck(
    resume: bulwark::ResumePoint,
    ctx: TaskContext,
) -> anyhow::Result<u32> {
    let start = resume
        .data
        .as_ref()
        .and_then(|d| d["next_slide"].as_u64())
        .unwrap_or(0) as u32;
    if resume.from_checkpoint {
        tracing::info!("Resuming at slide {} ({:.0}%)", start, resume.progress);
    }

    for slide in start..SLIDES {
        tokio::time::sleep(Duration::from_millis(15)).await;
        let progress = f64::from(slide + 1) / f64::from(SLIDES) * 100.0;
        ctx.report_progress_with_data(progress, serde_json::json!({ "next_slide": slide + 1 }))
            .await?;
    }
    Ok(SLIDES)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let mut config = BulwarkConfig::default();
    config.resumable.checkpoint_dir = dir.path().to_path_buf();
    let bulwark = Bulwark::new(config)?;

    tracing::info!("=== Run 1: cancelled halfway ===");
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(160)).await;
        canceller.cancel();
    });

    let first = bulwark
        .resumable()
        .process_with_retry(
            "import:quarterly.pptx",
            convert_deck,
            ProcessOptions::default().with_cancellation(token),
        )
        .await;
    match first {
        Err(BulwarkError::Cancelled { progress, .. }) => {
            tracing::info!("Cancelled at {:.0}%, checkpoint kept", progress)
        }
        other => tracing::warn!("Unexpected outcome: {:?}", other),
    }

    tracing::info!("=== Run 2: resume ===");
    let slides = bulwark
        .resumable()
        .process_with_retry("import:quarterly.pptx", convert_deck, ProcessOptions::default())
        .await?;
    tracing::info!("Converted {} slides", slides);

    tracing::info!("=== Register the import ===");
    let registered = bulwark
        .transaction("register-import")
        .execute(|tx| async move {
            let remote_id = tx
                .step_with_compensation(
                    "create-remote-record",
                    || async { Ok::<_, anyhow::Error>(7001u64) },
                    |id| async move {
                        tracing::info!("Deleting remote record {}", id);
                        Ok(())
                    },
                )
                .await?;
            tx.step("create-local-record", || async move {
                Err::<(), _>(anyhow::anyhow!(
                    "database disk image is malformed (remote {})",
                    remote_id
                ))
            })
            .await
        })
        .await;

    if let Err(e) = registered {
        tracing::warn!("Registration rolled back [{}]: {}", e.kind(), e);
    }

    Ok(())
}
