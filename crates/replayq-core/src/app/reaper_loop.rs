//! ReaperLoop - processing のまま止まったジョブの回収
//!
//! # フロー
//! 1. status = processing かつ updated_at < now - threshold のジョブを取得
//! 2. processing → failed（Timeout のエラーメッセージ付き）をガード付きで遷移
//!
//! 同時に走っているワーカーが先に completed にした場合、expected が一致しないので
//! スキップされる。何度実行しても結果は同じ。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use super::periodic::PeriodicTask;
use crate::domain::{JobStatus, TransitionFields};
use crate::error::PipelineError;
use crate::ports::{Clock, JobStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub examined: usize,
    pub recovered: usize,
    /// Left processing between the scan and the transition.
    pub skipped: usize,
}

pub struct OrphanSweep {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
}

impl OrphanSweep {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, threshold: Duration) -> Self {
        Self {
            store,
            clock,
            threshold,
        }
    }

    fn timeout_message(&self) -> String {
        PipelineError::Timeout(format!(
            "job stuck in processing for more than {}s",
            self.threshold.as_secs()
        ))
        .to_string()
    }

    pub async fn sweep(&self) -> Result<OrphanReport, PipelineError> {
        let cutoff = chrono::Duration::from_std(self.threshold)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .ok_or_else(|| {
                PipelineError::PermanentInput(format!(
                    "stuck threshold of {}s is out of range",
                    self.threshold.as_secs()
                ))
            })?;
        let stuck = self.store.list(JobStatus::Processing, Some(cutoff)).await?;

        let message = self.timeout_message();
        let mut report = OrphanReport::default();
        for job in stuck {
            report.examined += 1;
            let applied = self
                .store
                .transition(
                    job.id,
                    JobStatus::Processing,
                    JobStatus::Failed,
                    TransitionFields::error(message.clone()),
                )
                .await?;
            if applied {
                report.recovered += 1;
                warn!(job_id = %job.id, updated_at = %job.updated_at, "orphaned job failed");
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl PeriodicTask for OrphanSweep {
    fn name(&self) -> &'static str {
        "orphan_sweep"
    }

    async fn tick(&self) {
        match self.sweep().await {
            Ok(report) => info!(
                examined = report.examined,
                recovered = report.recovered,
                skipped = report.skipped,
                "orphan sweep done"
            ),
            Err(e) => error!(error = %e, "orphan sweep aborted"),
        }
    }
}
