//! Composition root for the emotion classification queue.
//!
//! Builds the configuration, the detection collaborator and the worker pool,
//! submits one job per content item id given on the command line, and runs
//! until Ctrl-C. The in-memory collaborator classifies every registered item.

use std::sync::Arc;

use anyhow::Context;

use emoqueue_core::ContentItemId;
use emoqueue_detection::InMemoryDetectionService;
use emoqueue_queue::{JobDescriptor, QueueConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    emoqueue_observability::init();

    let config = QueueConfig::from_env().context("invalid queue configuration")?;

    let items = std::env::args()
        .skip(1)
        .map(|arg| {
            arg.parse::<ContentItemId>()
                .with_context(|| format!("invalid content item id {arg:?}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let detection = Arc::new(InMemoryDetectionService::new());
    for item in &items {
        detection.add_item(item.clone());
    }

    let pool = WorkerPool::new(detection, config);
    pool.start();

    for item in items {
        let job_id = pool.submit(JobDescriptor::new(item.clone()));
        tracing::info!(job_id = %job_id, content_item_id = %item, "queued");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    let report = pool.stop().await;
    let stats = pool.stats();
    tracing::info!(
        report = %serde_json::to_string(&report)?,
        stats = %serde_json::to_string(&stats)?,
        "worker exiting"
    );

    Ok(())
}
