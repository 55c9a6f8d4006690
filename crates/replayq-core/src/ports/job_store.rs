//! JobStore port - ジョブ状態の正本（source of truth）
//!
//! # 設計原則
//! - 状態の変更は `transition`（compare-and-set）だけ。無条件の status 書き込みはしない
//! - ワーカーの completed 更新と orphan sweep の failed 更新が競合しても、
//!   expected status が一致した方だけが適用される
//! - 読み取りは常に最新のコミット済み状態を返す

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AnalysisJob, JobId, JobStatus, NewJob, TransitionFields};
use crate::error::StoreError;
use crate::observability::JobCounts;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `queued` and return its id.
    async fn create(&self, job: NewJob) -> Result<JobId, StoreError>;

    /// Guarded transition: applies only if the current status equals `expected`.
    ///
    /// Returns `Ok(false)` (no-op) when the row is missing or its status differs.
    /// Edges outside the lifecycle are rejected with `StoreError::IllegalTransition`.
    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> Result<bool, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError>;

    /// Jobs in `status`, optionally only those last updated before `updated_before`.
    /// Oldest first.
    async fn list(
        &self,
        status: JobStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<AnalysisJob>, StoreError>;

    /// Guarded delete: removes the row only if its status equals `expected`.
    async fn delete(&self, id: JobId, expected: JobStatus) -> Result<bool, StoreError>;

    async fn counts(&self) -> Result<JobCounts, StoreError>;

    /// Lightweight round-trip used by the health supervisor.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Reject edges that are not part of the lifecycle before touching storage.
pub(crate) fn ensure_edge(expected: JobStatus, next: JobStatus) -> Result<(), StoreError> {
    if expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            from: expected,
            to: next,
        })
    }
}
