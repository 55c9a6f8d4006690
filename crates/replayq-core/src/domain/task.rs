use serde::{Deserialize, Serialize};

use super::JobId;

/// What travels through the queue: a reference to an already-persisted job plus the
/// source file location. State lives in the job store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTask {
    job_id: JobId,
    file_path: String,
}

impl JobTask {
    pub fn new(job_id: JobId, file_path: impl Into<String>) -> Self {
        Self {
            job_id,
            file_path: file_path.into(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}
