//! replayq: run the analysis pipeline in one process.
//!
//! `replayq [REPLAY_FILE ...]` starts the worker pool and the supervisors, submits the
//! given files, prints `{"jobId": ...}` per submission and runs until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing::{error, info};

use replayq_core::app::{self, JobProcessor, WorkerPool};
use replayq_core::{Analyzer, Pipeline, PipelineConfig, PipelineContext, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // (A) 設定と接続（失敗したら起動しない）
    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let ctx = PipelineContext::from_config(&config)
        .await
        .context("failed to connect pipeline dependencies")?;
    let pipeline = Pipeline::new(ctx.clone());

    // (B) 前回 enqueue できなかった queued 行を戻す
    pipeline
        .recover_queued()
        .await
        .context("failed to re-enqueue queued jobs")?;

    // (C) worker pool と定期スーパーバイザー
    let processor = Arc::new(JobProcessor::new(ctx.clone(), Analyzer::default()));
    let pool = WorkerPool::spawn(config.worker_concurrency, &ctx, processor);
    let supervisors = app::spawn_supervisors(&ctx, &config);

    // (D) 引数のファイルを投入
    for file_path in std::env::args().skip(1) {
        match pipeline.submit(file_path.clone(), json!({})).await {
            Ok(id) => println!("{}", json!({ "jobId": id.to_string(), "filePath": file_path })),
            Err(e) => error!(file_path = %file_path, error = %e, "submit failed"),
        }
    }

    // (E) Ctrl-C で graceful shutdown
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    pool.request_shutdown();
    supervisors.shutdown_and_join().await;
    let stats = pool.shutdown_and_join().await;
    pipeline.close().await;

    info!(
        processed = stats.processed,
        completed = stats.completed,
        failed = stats.failed,
        retried = stats.retried,
        "stopped"
    );
    Ok(())
}
