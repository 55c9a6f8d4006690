//! Analysis job record and status lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Job status.
///
/// State transitions:
/// - Queued -> Processing -> Completed
/// - Queued -> Processing -> Failed
/// - Processing -> Processing (re-delivery after a retry backoff; refreshes `updated_at`)
///
/// Completed and Failed are terminal. The orphan sweep's timeout failure is the
/// ordinary Processing -> Failed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Persisted and waiting for a worker.
    Queued,

    /// Claimed by exactly one worker.
    Processing,

    /// Result artifact written, `result_path` set.
    Completed,

    /// Gave up, `error_message` set.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Is `self -> next` an edge of the lifecycle?
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Input to `JobStore::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub file_path: String,

    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::json!({})
}

impl NewJob {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            metadata: empty_metadata(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Canonical persisted record of one job.
///
/// Design: fields are only changed through `JobStore::transition`, never assigned
/// directly by workers or supervisors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: JobId,
    pub status: JobStatus,
    pub file_path: String,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,

    /// How many times a worker has claimed this job.
    pub attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(id: JobId, job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            file_path: job.file_path,
            result_path: None,
            error_message: None,
            metadata: job.metadata,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an already-validated transition.
    pub(crate) fn apply(&mut self, next: JobStatus, fields: &TransitionFields, now: DateTime<Utc>) {
        if next == JobStatus::Processing {
            self.attempts += 1;
        }
        if let Some(path) = &fields.result_path {
            self.result_path = Some(path.clone());
        }
        if let Some(message) = &fields.error_message {
            self.error_message = Some(message.clone());
        }
        self.status = next;
        self.updated_at = now;
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            status: self.status,
            result_path: self.result_path.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Extra columns written together with a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub result_path: Option<String>,
    pub error_message: Option<String>,
}

impl TransitionFields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn result(path: impl Into<String>) -> Self {
        Self {
            result_path: Some(path.into()),
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result_path: None,
            error_message: Some(message.into()),
        }
    }
}

/// What the status collaborator sees: `{status, resultPath?, errorMessage?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(JobStatus::Queued, JobStatus::Processing, true)]
    #[case::redelivery(JobStatus::Processing, JobStatus::Processing, true)]
    #[case::complete(JobStatus::Processing, JobStatus::Completed, true)]
    #[case::fail(JobStatus::Processing, JobStatus::Failed, true)]
    #[case::skip_processing(JobStatus::Queued, JobStatus::Completed, false)]
    #[case::fail_unclaimed(JobStatus::Queued, JobStatus::Failed, false)]
    #[case::reopen_completed(JobStatus::Completed, JobStatus::Processing, false)]
    #[case::reopen_failed(JobStatus::Failed, JobStatus::Processing, false)]
    #[case::overwrite_completed(JobStatus::Completed, JobStatus::Failed, false)]
    #[case::overwrite_failed(JobStatus::Failed, JobStatus::Completed, false)]
    #[case::requeue(JobStatus::Processing, JobStatus::Queued, false)]
    fn lifecycle_edges(#[case] from: JobStatus, #[case] to: JobStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_text_roundtrips() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn status_view_uses_camel_case_and_omits_empty_fields() {
        let view = JobStatusView {
            status: JobStatus::Failed,
            result_path: None,
            error_message: Some("parser returned 500".to_string()),
        };

        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["errorMessage"], "parser returned 500");
        assert!(v.get("resultPath").is_none());
    }

    #[test]
    fn apply_counts_claims_and_keeps_fields() {
        let now = Utc::now();
        let mut job = AnalysisJob::new(
            JobId::from_ulid(ulid::Ulid::new()),
            NewJob::new("/tmp/a.replay"),
            now,
        );

        job.apply(JobStatus::Processing, &TransitionFields::none(), now);
        job.apply(JobStatus::Processing, &TransitionFields::none(), now);
        job.apply(JobStatus::Completed, &TransitionFields::result("/r/a.json"), now);

        assert_eq!(job.attempts, 2);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_path.as_deref(), Some("/r/a.json"));
        assert!(job.error_message.is_none());
    }
}
