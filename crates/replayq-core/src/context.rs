//! Shared handles, built once at startup and passed by reference.
//!
//! 全コンポーネント（ワーカープール、ヘルス監視、スイープ）は同じ
//! `PipelineContext` を clone して使う。グローバルな接続は持たない。

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::domain::{JobId, JobStatus, JobStatusView, JobTask, NewJob};
use crate::error::PipelineError;
use crate::impls::{HttpReplayParser, LocalArtifactStore, LogAlertSink, WebhookAlertSink};
use crate::ports::{AlertSink, ArtifactStore, Clock, JobStore, ReplayParser, SystemClock};
use crate::queue::{InMemoryQueue, JobQueue, RateLimiter};
use crate::store::{InMemoryJobStore, PgJobStore};

/// Connection handles shared by the dispatcher, the worker pool and both supervisors.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub parser: Arc<dyn ReplayParser>,
    pub alerts: Arc<dyn AlertSink>,
    pub clock: Arc<dyn Clock>,

    /// Dequeue rate limit shared by every worker.
    pub limiter: Arc<RateLimiter>,

    /// Set when the store is Postgres, so teardown can close the pool.
    pg: Option<PgJobStore>,
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        artifacts: Arc<dyn ArtifactStore>,
        parser: Arc<dyn ReplayParser>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            queue,
            artifacts,
            parser,
            alerts,
            clock,
            limiter,
            pg: None,
        }
    }

    /// Build every handle from configuration.
    ///
    /// - `DATABASE_URL` set → Postgres (migrated on connect), otherwise in-memory.
    /// - broker URL set → Redis queue (feature `redis`), otherwise in-process.
    /// - alert webhook set → webhook sink, otherwise alerts are only logged.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (store, pg): (Arc<dyn JobStore>, Option<PgJobStore>) = match &config.database_url {
            Some(url) => {
                let pg = PgJobStore::connect(url, pool_size(config), Arc::clone(&clock)).await?;
                pg.migrate().await?;
                info!("job store: postgres");
                (Arc::new(pg.clone()), Some(pg))
            }
            None => {
                info!("job store: in-memory");
                (Arc::new(InMemoryJobStore::new(Arc::clone(&clock))), None)
            }
        };

        let queue = build_queue(config).await?;

        let artifacts = LocalArtifactStore::new(&config.results_dir);
        artifacts.ensure_dir().await?;

        let parser = HttpReplayParser::new(&config.parser_url, config.parser_timeout)?;

        let alerts: Arc<dyn AlertSink> = match &config.alert_webhook_url {
            Some(url) => Arc::new(
                WebhookAlertSink::new(url, config.health_timeout)
                    .map_err(|e| PipelineError::TransientDependency(e.to_string()))?,
            ),
            None => Arc::new(LogAlertSink),
        };

        let mut ctx = Self::new(
            store,
            queue,
            Arc::new(artifacts),
            Arc::new(parser),
            alerts,
            clock,
            Arc::new(RateLimiter::new(config.rate_limit, config.rate_window)),
        );
        ctx.pg = pg;
        Ok(ctx)
    }

    /// Close the queue and the database pool.
    pub async fn close(&self) {
        self.queue.close().await;
        if let Some(pg) = &self.pg {
            pg.close().await;
        }
    }
}

/// Workers, the dispatcher and both sweeps share one pool.
fn pool_size(config: &PipelineConfig) -> u32 {
    (config.worker_concurrency as u32).saturating_add(4)
}

#[cfg(feature = "redis")]
async fn build_queue(config: &PipelineConfig) -> Result<Arc<dyn JobQueue>, PipelineError> {
    match &config.broker_url {
        Some(url) => {
            info!("job queue: redis");
            Ok(Arc::new(
                crate::queue::RedisQueue::connect(url, config.retry_policy()).await?,
            ))
        }
        None => {
            info!("job queue: in-process");
            Ok(Arc::new(InMemoryQueue::new(config.retry_policy())))
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn build_queue(config: &PipelineConfig) -> Result<Arc<dyn JobQueue>, PipelineError> {
    if config.broker_url.is_some() {
        warn!("broker URL set but built without the `redis` feature; using the in-process queue");
    } else {
        info!("job queue: in-process");
    }
    Ok(Arc::new(InMemoryQueue::new(config.retry_policy())))
}

/// Surface used by the submission and status collaborators.
#[derive(Clone)]
pub struct Pipeline {
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Persist a job and enqueue it. Returns as soon as the task is queued.
    ///
    /// If the enqueue fails the row stays `queued` and is picked up by
    /// `recover_queued` on the next start.
    pub async fn submit(
        &self,
        file_path: impl Into<String>,
        metadata: Value,
    ) -> Result<JobId, PipelineError> {
        let job = NewJob::new(file_path).with_metadata(metadata);
        let file_path = job.file_path.clone();

        let id = self.ctx.store.create(job).await?;
        self.ctx.queue.enqueue(JobTask::new(id, file_path)).await?;

        info!(job_id = %id, "job submitted");
        Ok(id)
    }

    /// `{status, resultPath?, errorMessage?}` for a job, `None` if unknown.
    pub async fn status(&self, id: JobId) -> Result<Option<JobStatusView>, PipelineError> {
        Ok(self.ctx.store.get(id).await?.map(|job| job.status_view()))
    }

    /// Re-enqueue every row still `queued` (startup recovery). Returns how many.
    pub async fn recover_queued(&self) -> Result<usize, PipelineError> {
        let queued = self.ctx.store.list(JobStatus::Queued, None).await?;
        let n = queued.len();
        for job in queued {
            self.ctx
                .queue
                .enqueue(JobTask::new(job.id, job.file_path))
                .await?;
        }
        if n > 0 {
            info!(recovered = n, "re-enqueued queued jobs");
        }
        Ok(n)
    }

    pub async fn close(&self) {
        self.ctx.close().await;
    }
}
