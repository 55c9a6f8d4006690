//! ArtifactStore port - 結果ファイルとソースファイルの保存先

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::JobId;
use crate::error::PipelineError;

/// Outcome of removing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    AlreadyGone,
}

/// ArtifactStore は結果 JSON を保存・削除する
///
/// # 設計原則
/// - 1 ジョブにつき 1 ファイル、名前は job id
/// - 再配送で同じジョブをもう一度処理しても、追記ではなく上書きになる
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Where the result for `job_id` lives (whether or not it exists yet).
    fn result_path(&self, job_id: JobId) -> PathBuf;

    /// Write (or overwrite) the result artifact and return its path.
    async fn put_result(
        &self,
        job_id: JobId,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, PipelineError>;

    /// Remove a file. A missing file is not an error.
    async fn remove(&self, path: &Path) -> std::io::Result<Removal>;
}
