//! LocalArtifactStore - 結果 JSON をローカルディレクトリに保存する
//!
//! `<dir>/<job id>.json`。一時ファイルに書いてから rename するので、
//! 読み手が書きかけのファイルを見ることはない。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::JobId;
use crate::error::PipelineError;
use crate::ports::{ArtifactStore, Removal};

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the results directory if missing.
    pub async fn ensure_dir(&self) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            PipelineError::Persistence(format!(
                "failed to create results dir {}: {e}",
                self.dir.display()
            ))
        })
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn result_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    async fn put_result(
        &self,
        job_id: JobId,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, PipelineError> {
        self.ensure_dir().await?;

        let path = self.result_path(job_id);
        let tmp_path = self.dir.join(format!(".{job_id}.json.tmp"));

        let bytes = serde_json::to_vec_pretty(payload).map_err(|e| {
            PipelineError::Persistence(format!("failed to serialize result for {job_id}: {e}"))
        })?;

        tokio::fs::write(&tmp_path, bytes).await.map_err(|e| {
            PipelineError::Persistence(format!(
                "failed to write {}: {e}",
                tmp_path.display()
            ))
        })?;

        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            PipelineError::Persistence(format!(
                "failed to rename {} to {}: {e}",
                tmp_path.display(),
                path.display()
            ))
        })?;

        debug!(job_id = %job_id, path = %path.display(), "result artifact written");
        Ok(path)
    }

    async fn remove(&self, path: &Path) -> std::io::Result<Removal> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(Removal::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Removal::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use serde_json::json;

    #[tokio::test]
    async fn put_result_writes_named_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("results"));
        let id = JobId::generate(&SystemClock);

        let path = store.put_result(id, &json!({"map": "dust2"})).await.unwrap();

        assert_eq!(path, dir.path().join("results").join(format!("{id}.json")));
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["map"], "dust2");
    }

    #[tokio::test]
    async fn second_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let id = JobId::generate(&SystemClock);

        store.put_result(id, &json!({"try": 1})).await.unwrap();
        let path = store.put_result(id, &json!({"try": 2})).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, json!({"try": 2}));

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1, "temp file must not be left behind");
    }

    #[tokio::test]
    async fn remove_missing_file_is_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let id = JobId::generate(&SystemClock);
        let path = store.put_result(id, &json!({})).await.unwrap();

        assert_eq!(store.remove(&path).await.unwrap(), Removal::Removed);
        assert_eq!(store.remove(&path).await.unwrap(), Removal::AlreadyGone);
    }

    #[tokio::test]
    async fn remove_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        assert!(store.remove(dir.path()).await.is_err());
    }
}
