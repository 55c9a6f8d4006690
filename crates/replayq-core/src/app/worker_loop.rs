//! WorkerLoop - ジョブ実行ループ
//!
//! # フロー
//! 1. JobQueue::lease() でタスク取得
//! 2. RateLimiter::acquire() でパーサーへの流量を制限
//! 3. JobStore::transition() で processing を claim（ガード付き）
//! 4. ReplayParser::parse() → Analyzer::enrich()
//! 5. ArtifactStore::put_result() で結果 JSON を保存
//! 6. processing → completed（result_path 付き）
//!
//! 失敗時は Lease::fail() でキューにリトライ判断を任せ、諦めた場合だけ
//! processing → failed に遷移する。1 ジョブの失敗（panic 含む）でワーカーは落ちない。

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analysis::Analyzer;
use crate::context::PipelineContext;
use crate::domain::{JobId, JobStatus, JobTask, TransitionFields};
use crate::error::PipelineError;
use crate::queue::{Disposition, Lease};

/// Counters shared by all workers of a pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    /// Deliveries handled (including ones dropped at claim).
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst);
    }
}

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { result_path: String },
    RetryScheduled { attempt: u32 },
    Failed { error_message: String },
    /// Not claimable (terminal, missing, or taken by another delivery); acked untouched.
    Skipped,
    /// Queue closed before the retry was scheduled; the row stays `processing`.
    Abandoned,
}

/// Runs one delivery end to end. Never returns an error: every failure is recorded on
/// the job row or handed back to the queue.
pub struct JobProcessor {
    ctx: PipelineContext,
    analyzer: Analyzer,
}

impl JobProcessor {
    pub fn new(ctx: PipelineContext, analyzer: Analyzer) -> Self {
        Self { ctx, analyzer }
    }

    pub async fn process(&self, lease: Box<dyn Lease>, stats: &WorkerStats) -> JobOutcome {
        let task = lease.task().clone();
        let attempt = lease.attempt();
        let job_id = task.job_id();
        if let Some(previous) = lease.last_error() {
            debug!(job_id = %job_id, attempt, previous_error = previous, "re-delivery");
        }

        match self.claim(job_id, attempt).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job_id, attempt, "job not claimable; dropping delivery");
                if let Err(e) = lease.ack().await {
                    warn!(job_id = %job_id, error = %e, "ack failed");
                }
                return JobOutcome::Skipped;
            }
            Err(e) => {
                // Row untouched: the next delivery claims from `queued` again.
                warn!(job_id = %job_id, attempt, error = %e, "claim failed");
                return self.give_back(lease, job_id, &e, stats).await;
            }
        }

        match self.run(&task).await {
            Ok(result_path) => self.complete(lease, job_id, result_path, stats).await,
            Err(e) => self.give_back(lease, job_id, &e, stats).await,
        }
    }

    /// First delivery: `queued → processing`. Re-delivery: `processing → processing`
    /// (refreshes `updated_at`), falling back to `queued → processing` when the earlier
    /// claim never landed.
    async fn claim(&self, job_id: JobId, attempt: u32) -> Result<bool, PipelineError> {
        let store = &self.ctx.store;
        if attempt > 1
            && store
                .transition(
                    job_id,
                    JobStatus::Processing,
                    JobStatus::Processing,
                    TransitionFields::none(),
                )
                .await?
        {
            return Ok(true);
        }
        Ok(store
            .transition(
                job_id,
                JobStatus::Queued,
                JobStatus::Processing,
                TransitionFields::none(),
            )
            .await?)
    }

    async fn run(&self, task: &JobTask) -> Result<String, PipelineError> {
        let parsed = self.ctx.parser.parse(Path::new(task.file_path())).await?;
        let merged = self.analyzer.enrich(parsed)?;
        let path = self.ctx.artifacts.put_result(task.job_id(), &merged).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn complete(
        &self,
        lease: Box<dyn Lease>,
        job_id: JobId,
        result_path: String,
        stats: &WorkerStats,
    ) -> JobOutcome {
        let applied = self
            .ctx
            .store
            .transition(
                job_id,
                JobStatus::Processing,
                JobStatus::Completed,
                TransitionFields::result(result_path.clone()),
            )
            .await;

        match applied {
            Ok(true) => {
                if let Err(e) = lease.ack().await {
                    warn!(job_id = %job_id, error = %e, "ack failed");
                }
                stats.completed.fetch_add(1, Ordering::SeqCst);
                info!(job_id = %job_id, result_path = %result_path, "job completed");
                JobOutcome::Completed { result_path }
            }
            Ok(false) => {
                // Someone else (the orphan sweep) finished the row first.
                warn!(job_id = %job_id, "job left processing before completion; discarding result");
                if let Err(e) = self.ctx.artifacts.remove(Path::new(&result_path)).await {
                    warn!(job_id = %job_id, error = %e, "failed to remove discarded result");
                }
                if let Err(e) = lease.ack().await {
                    warn!(job_id = %job_id, error = %e, "ack failed");
                }
                JobOutcome::Skipped
            }
            Err(e) => {
                let e = PipelineError::from(e);
                self.give_back(lease, job_id, &e, stats).await
            }
        }
    }

    /// Hand a failed delivery back to the queue; mark the row failed if it gave up.
    async fn give_back(
        &self,
        lease: Box<dyn Lease>,
        job_id: JobId,
        err: &PipelineError,
        stats: &WorkerStats,
    ) -> JobOutcome {
        let attempt = lease.attempt();
        let message = err.to_string();

        let disposition = match lease.fail(&message, err.is_retryable()).await {
            Ok(d) => d,
            Err(e) => {
                error!(job_id = %job_id, attempt, error = %e, "failed to report failure to queue");
                return JobOutcome::Abandoned;
            }
        };

        match disposition {
            Disposition::RetryScheduled { delay, attempt } => {
                stats.retried.fetch_add(1, Ordering::SeqCst);
                warn!(
                    job_id = %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "job failed; retry scheduled"
                );
                JobOutcome::RetryScheduled { attempt }
            }
            Disposition::Exhausted { attempts } => {
                let error_message = if attempts > 1 {
                    format!("{message} (after {attempts} attempts)")
                } else {
                    message
                };
                match self.fail_row(job_id, &error_message).await {
                    Ok(true) => {
                        stats.failed.fetch_add(1, Ordering::SeqCst);
                        error!(job_id = %job_id, attempts, error = %error_message, "job failed");
                        JobOutcome::Failed { error_message }
                    }
                    Ok(false) => {
                        debug!(job_id = %job_id, "job already finished elsewhere");
                        JobOutcome::Skipped
                    }
                    Err(e) => {
                        // queued rows come back via recover_queued, processing ones via the orphan sweep
                        error!(
                            job_id = %job_id,
                            attempts,
                            error = %error_message,
                            store_error = %e,
                            "could not mark job failed; row left for recovery"
                        );
                        JobOutcome::Abandoned
                    }
                }
            }
            Disposition::Dropped => {
                warn!(job_id = %job_id, attempt, "queue closed; job left for the orphan sweep");
                JobOutcome::Abandoned
            }
        }
    }

    /// `processing → failed`. A row whose claim never landed is still `queued`; it is
    /// claimed first so it fails through the same edges.
    ///
    /// `Ok(false)`: the row already left the lifecycle (terminal or gone).
    async fn fail_row(&self, job_id: JobId, error_message: &str) -> Result<bool, PipelineError> {
        let store = &self.ctx.store;
        let mark_failed = || {
            store.transition(
                job_id,
                JobStatus::Processing,
                JobStatus::Failed,
                TransitionFields::error(error_message),
            )
        };

        if mark_failed().await? {
            return Ok(true);
        }
        let claimed = store
            .transition(
                job_id,
                JobStatus::Queued,
                JobStatus::Processing,
                TransitionFields::none(),
            )
            .await?;
        if !claimed {
            return Ok(false);
        }
        Ok(mark_failed().await?)
    }
}

/// Worker pool handle.
/// - `shutdown_and_join()` で lease を止め、実行中のジョブの終了を待つ
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    /// Spawn `n` workers sharing `ctx.queue` and `ctx.limiter`.
    pub fn spawn(n: usize, ctx: &PipelineContext, processor: Arc<JobProcessor>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let ctx = ctx.clone();
            let processor = Arc::clone(&processor);
            let stats = Arc::clone(&stats);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, ctx, processor, stats, &mut rx).await;
            });
            joins.push(join);
        }

        info!(workers = n, "worker pool started");
        Self {
            shutdown_tx,
            joins,
            stats,
        }
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop taking new leases. In-flight jobs are not cancelled.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) -> WorkerStatsSnapshot {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
        self.stats.snapshot()
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: PipelineContext,
    processor: Arc<JobProcessor>,
    stats: Arc<WorkerStats>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は待つので shutdown と競合させる
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = ctx.queue.lease() => lease,
        };

        let Some(lease) = lease else {
            // queue closed
            break;
        };

        ctx.limiter.acquire().await;

        stats.enter();
        let job_id = lease.task().job_id();
        let job = {
            let processor = Arc::clone(&processor);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move { processor.process(lease, &stats).await })
        };
        // A panicking job only takes down its own task.
        if let Err(e) = job.await {
            error!(worker = worker_id, job_id = %job_id, error = %e, "job task aborted");
        }
        stats.leave();
    }

    debug!(worker = worker_id, "worker stopped");
}
