//! Redis-backed queue (broker mode, feature `redis`).
//!
//! ## Keys
//!
//! - **`<prefix>:ready`**: LIST of task JSON, pushed left and popped right (FIFO)
//! - **`<prefix>:inflight`**: LIST of leased task JSON, removed on ack/fail
//! - **`<prefix>:delayed`**: ZSET of retries scored by due time (unix ms)
//!
//! A task's JSON carries its delivery count and the previous failure, so a retry is
//! a new member with `attempt + 1`. Entries left in `inflight` by a dead process are not re-queued here;
//! the orphan sweep fails their jobs through the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Disposition, JobQueue, Lease, RetryPolicy};
use crate::domain::JobTask;
use crate::error::PipelineError;

const DEFAULT_PREFIX: &str = "replayq";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireTask {
    #[serde(flatten)]
    task: JobTask,
    attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

#[derive(Clone)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
    ready_key: String,
    inflight_key: String,
    delayed_key: String,
    retry_policy: RetryPolicy,
    closed: Arc<AtomicBool>,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> PipelineError {
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        PipelineError::TransientDependency(format!("redis {operation}: {err}"))
    } else {
        PipelineError::Persistence(format!("redis {operation}: {err}"))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl RedisQueue {
    /// Connect to `redis_url` (e.g. "redis://localhost:6379").
    pub async fn connect(
        redis_url: &str,
        retry_policy: RetryPolicy,
    ) -> Result<Self, PipelineError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PipelineError::Persistence(format!("redis url: {e}")))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| map_redis_error("connect", e))?;

        Ok(Self {
            conn,
            ready_key: format!("{DEFAULT_PREFIX}:ready"),
            inflight_key: format!("{DEFAULT_PREFIX}:inflight"),
            delayed_key: format!("{DEFAULT_PREFIX}:delayed"),
            retry_policy,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Move due retries from the delayed set to the ready list.
    ///
    /// ZREM decides ownership, so two workers promoting at once push each entry once.
    async fn promote_due(&self) -> Result<(), PipelineError> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.delayed_key)
            .arg("-inf")
            .arg(now_ms())
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("ZRANGEBYSCORE", e))?;

        for raw in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.delayed_key)
                .arg(&raw)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error("ZREM", e))?;
            if removed == 1 {
                let _: i64 = redis::cmd("LPUSH")
                    .arg(&self.ready_key)
                    .arg(&raw)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_error("LPUSH", e))?;
            }
        }
        Ok(())
    }

    async fn try_lease(&self) -> Result<Option<RedisLease>, PipelineError> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(&self.ready_key)
            .arg(&self.inflight_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("RPOPLPUSH", e))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<WireTask>(&raw) {
            Ok(wire) => Ok(Some(RedisLease {
                queue: self.clone(),
                raw,
                wire,
            })),
            Err(e) => {
                warn!(error = %e, "dropping undecodable queue entry");
                let _: i64 = redis::cmd("LREM")
                    .arg(&self.inflight_key)
                    .arg(1)
                    .arg(&raw)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_error("LREM", e))?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, task: JobTask) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::Persistence("queue is closed".to_string()));
        }
        let raw = serde_json::to_string(&WireTask {
            task,
            attempt: 1,
            last_error: None,
        })
            .map_err(|e| PipelineError::Persistence(format!("encode task: {e}")))?;

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.ready_key)
            .arg(raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("LPUSH", e))?;
        Ok(())
    }

    async fn lease(&self) -> Option<Box<dyn Lease>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match self.try_lease().await {
                Ok(Some(lease)) => return Some(Box::new(lease)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "lease attempt failed"),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn depth(&self) -> Result<usize, PipelineError> {
        let mut conn = self.conn.clone();
        let (ready, delayed): (usize, usize) = redis::pipe()
            .cmd("LLEN")
            .arg(&self.ready_key)
            .cmd("ZCARD")
            .arg(&self.delayed_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("depth", e))?;
        Ok(ready + delayed)
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("PING", e))?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct RedisLease {
    queue: RedisQueue,
    raw: String,
    wire: WireTask,
}

#[async_trait]
impl Lease for RedisLease {
    fn task(&self) -> &JobTask {
        &self.wire.task
    }

    fn attempt(&self) -> u32 {
        self.wire.attempt
    }

    fn last_error(&self) -> Option<&str> {
        self.wire.last_error.as_deref()
    }

    async fn ack(self: Box<Self>) -> Result<(), PipelineError> {
        let mut conn = self.queue.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(&self.queue.inflight_key)
            .arg(1)
            .arg(&self.raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("LREM", e))?;
        Ok(())
    }

    async fn fail(
        self: Box<Self>,
        error: &str,
        retryable: bool,
    ) -> Result<Disposition, PipelineError> {
        let mut conn = self.queue.conn.clone();
        let disposition = self.queue.retry_policy.decide(self.wire.attempt, retryable);

        match disposition {
            Disposition::RetryScheduled { delay, attempt } => {
                let next = serde_json::to_string(&WireTask {
                    task: self.wire.task.clone(),
                    attempt,
                    last_error: Some(error.to_string()),
                })
                .map_err(|e| PipelineError::Persistence(format!("encode task: {e}")))?;
                let due = now_ms() + delay.as_millis() as i64;

                let _: (i64, i64) = redis::pipe()
                    .atomic()
                    .cmd("LREM")
                    .arg(&self.queue.inflight_key)
                    .arg(1)
                    .arg(&self.raw)
                    .cmd("ZADD")
                    .arg(&self.queue.delayed_key)
                    .arg(due)
                    .arg(next)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_error("schedule retry", e))?;
            }
            Disposition::Exhausted { .. } | Disposition::Dropped => {
                let _: i64 = redis::cmd("LREM")
                    .arg(&self.queue.inflight_key)
                    .arg(1)
                    .arg(&self.raw)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_error("LREM", e))?;
            }
        }

        Ok(disposition)
    }
}
