//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AnalysisJob, JobId, JobStatus, NewJob, TransitionFields};
use crate::error::StoreError;
use crate::observability::JobCounts;
use crate::ports::job_store::ensure_edge;
use crate::ports::{Clock, JobStore};

/// In-memory job store.
///
/// Every operation takes the lock once and never awaits while holding it, so a
/// guarded transition is atomic with respect to every other operation.
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, AnalysisJob>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, AnalysisJob>>, StoreError> {
        self.jobs
            .read()
            .map_err(|_| StoreError::Database("job table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, AnalysisJob>>, StoreError> {
        self.jobs
            .write()
            .map_err(|_| StoreError::Database("job table lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<JobId, StoreError> {
        let id = JobId::generate(self.clock.as_ref());
        let record = AnalysisJob::new(id, job, self.clock.now());
        self.write()?.insert(id, record);
        Ok(id)
    }

    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> Result<bool, StoreError> {
        ensure_edge(expected, next)?;

        let mut jobs = self.write()?;
        match jobs.get_mut(&id) {
            Some(job) if job.status == expected => {
                job.apply(next, &fields, self.clock.now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn list(
        &self,
        status: JobStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.status == status && updated_before.is_none_or(|t| j.updated_at < t))
            .cloned()
            .collect();
        result.sort_by_key(|j| (j.updated_at, j.id));
        Ok(result)
    }

    async fn delete(&self, id: JobId, expected: JobStatus) -> Result<bool, StoreError> {
        let mut jobs = self.write()?;
        match jobs.get(&id) {
            Some(job) if job.status == expected => {
                jobs.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let mut counts = JobCounts::default();
        for job in self.read()?.values() {
            counts.record(job.status);
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;
    use chrono::TimeZone;

    fn store_at(clock: Arc<ManualClock>) -> InMemoryJobStore {
        InMemoryJobStore::new(clock)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn create_starts_queued() {
        let store = store_at(Arc::new(ManualClock::new(start())));
        let id = store.create(NewJob::new("/data/a.replay")).await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.file_path, "/data/a.replay");
        assert_eq!(job.created_at, start());
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn guarded_transition_applies_only_on_expected_status() {
        let store = store_at(Arc::new(ManualClock::new(start())));
        let id = store.create(NewJob::new("/data/a.replay")).await.unwrap();

        let applied = store
            .transition(id, JobStatus::Queued, JobStatus::Processing, TransitionFields::none())
            .await
            .unwrap();
        assert!(applied);

        // A second claimer expecting `queued` loses.
        let applied = store
            .transition(id, JobStatus::Queued, JobStatus::Processing, TransitionFields::none())
            .await
            .unwrap();
        assert!(!applied);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn completion_and_timeout_race_has_one_winner() {
        let store = store_at(Arc::new(ManualClock::new(start())));
        let id = store.create(NewJob::new("/data/a.replay")).await.unwrap();
        store
            .transition(id, JobStatus::Queued, JobStatus::Processing, TransitionFields::none())
            .await
            .unwrap();

        let completed = store
            .transition(
                id,
                JobStatus::Processing,
                JobStatus::Completed,
                TransitionFields::result("/results/a.json"),
            )
            .await
            .unwrap();
        let timed_out = store
            .transition(
                id,
                JobStatus::Processing,
                JobStatus::Failed,
                TransitionFields::error("timeout"),
            )
            .await
            .unwrap();

        assert!(completed);
        assert!(!timed_out);
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn illegal_edges_are_rejected_before_lookup() {
        let store = store_at(Arc::new(ManualClock::new(start())));
        let id = store.create(NewJob::new("/data/a.replay")).await.unwrap();

        let err = store
            .transition(id, JobStatus::Completed, JobStatus::Processing, TransitionFields::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::IllegalTransition {
                from: JobStatus::Completed,
                to: JobStatus::Processing
            }
        ));
    }

    #[tokio::test]
    async fn transition_on_missing_row_is_a_no_op() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = store_at(clock.clone());
        let ghost = JobId::generate(clock.as_ref());

        let applied = store
            .transition(ghost, JobStatus::Queued, JobStatus::Processing, TransitionFields::none())
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_age() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = store_at(clock.clone());

        let old = store.create(NewJob::new("/data/old.replay")).await.unwrap();
        clock.advance(chrono::Duration::hours(2));
        let fresh = store.create(NewJob::new("/data/fresh.replay")).await.unwrap();

        let cutoff = clock.now() - chrono::Duration::hours(1);
        let stale = store.list(JobStatus::Queued, Some(cutoff)).await.unwrap();
        let all = store.list(JobStatus::Queued, None).await.unwrap();

        assert_eq!(stale.iter().map(|j| j.id).collect::<Vec<_>>(), vec![old]);
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![old, fresh]);
        assert!(store.list(JobStatus::Failed, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_guarded_by_status() {
        let store = store_at(Arc::new(ManualClock::new(start())));
        let id = store.create(NewJob::new("/data/a.replay")).await.unwrap();

        assert!(!store.delete(id, JobStatus::Completed).await.unwrap());
        assert!(store.get(id).await.unwrap().is_some());

        assert!(store.delete(id, JobStatus::Queued).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counts_track_statuses() {
        let store = store_at(Arc::new(ManualClock::new(start())));
        let a = store.create(NewJob::new("/a")).await.unwrap();
        store.create(NewJob::new("/b")).await.unwrap();
        store
            .transition(a, JobStatus::Queued, JobStatus::Processing, TransitionFields::none())
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.total(), 2);
    }
}
