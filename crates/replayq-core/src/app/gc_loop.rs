//! GCLoop - 保持期間を過ぎた completed ジョブの削除
//!
//! # フロー
//! 1. status = completed かつ updated_at < now - retention のジョブを取得
//! 2. 結果ファイルとソースファイルを削除（個別の失敗はログして続行、件数に集計）
//! 3. 行をガード付き delete（expected = completed）で削除
//!
//! completed 以外（queued / processing / failed）は年齢に関係なく触らない。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use super::periodic::PeriodicTask;
use crate::domain::JobStatus;
use crate::error::PipelineError;
use crate::ports::{ArtifactStore, Clock, JobStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub examined: usize,
    pub rows_deleted: usize,
    /// Includes files that were already gone.
    pub files_deleted: usize,
    pub file_failures: usize,
}

pub struct ExpirySweep {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl ExpirySweep {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            store,
            artifacts,
            clock,
            retention,
        }
    }

    pub async fn sweep(&self) -> Result<ExpiryReport, PipelineError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.retention)
            .ok_or_else(|| {
                PipelineError::PermanentInput(format!(
                    "retention of {} days is out of range",
                    self.retention.num_days()
                ))
            })?;
        let expired = self.store.list(JobStatus::Completed, Some(cutoff)).await?;

        let mut report = ExpiryReport::default();
        for job in expired {
            report.examined += 1;

            let files = job
                .result_path
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(job.file_path.as_str()));
            for file in files {
                match self.artifacts.remove(Path::new(file)).await {
                    Ok(_) => report.files_deleted += 1,
                    Err(e) => {
                        report.file_failures += 1;
                        warn!(job_id = %job.id, path = file, error = %e, "failed to delete file");
                    }
                }
            }

            if self.store.delete(job.id, JobStatus::Completed).await? {
                report.rows_deleted += 1;
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl PeriodicTask for ExpirySweep {
    fn name(&self) -> &'static str {
        "expiry_sweep"
    }

    async fn tick(&self) {
        match self.sweep().await {
            Ok(report) => info!(
                examined = report.examined,
                rows_deleted = report.rows_deleted,
                files_deleted = report.files_deleted,
                file_failures = report.file_failures,
                "expiry sweep done"
            ),
            Err(e) => error!(error = %e, "expiry sweep aborted"),
        }
    }
}
