//! Queue module: delivery port, retry logic, rate limiting and implementations.

mod memory;
mod rate_limit;
#[cfg(feature = "redis")]
mod redis;
mod retry;

pub use memory::InMemoryQueue;
pub use rate_limit::RateLimiter;
#[cfg(feature = "redis")]
pub use self::redis::RedisQueue;
pub use retry::RetryPolicy;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::JobTask;
use crate::error::PipelineError;

/// What the queue did with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The task comes back after `delay` as delivery number `attempt`.
    RetryScheduled { delay: Duration, attempt: u32 },

    /// No more deliveries: the budget is spent or the error is not retryable.
    Exhausted { attempts: u32 },

    /// The queue was closed before the retry could be scheduled.
    Dropped,
}

/// A leased task for processing.
/// The worker owns this lease and must either `ack` or `fail`.
///
/// Design intent:
/// - Queue decides retry timing and the retry budget.
/// - Worker executes side effects, updates the job row and reports the result.
#[async_trait]
pub trait Lease: Send {
    fn task(&self) -> &JobTask;

    /// 1-based delivery count of this task.
    fn attempt(&self) -> u32;

    /// Error reported by the previous delivery, if this is a retry.
    fn last_error(&self) -> Option<&str>;

    /// Mark success (or "nothing left to do").
    async fn ack(self: Box<Self>) -> Result<(), PipelineError>;

    /// Mark failure; the queue decides between retry and giving up.
    /// A retry carries `error` as its `last_error`.
    async fn fail(
        self: Box<Self>,
        error: &str,
        retryable: bool,
    ) -> Result<Disposition, PipelineError>;
}

/// Queue port (interface). At-least-once delivery between submission and workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a task for an already-persisted job. Returns immediately.
    async fn enqueue(&self, task: JobTask) -> Result<(), PipelineError>;

    /// Lease one ready task (waits until available, or returns None once closed).
    async fn lease(&self) -> Option<Box<dyn Lease>>;

    /// Tasks waiting for a worker, including scheduled retries.
    async fn depth(&self) -> Result<usize, PipelineError>;

    /// Lightweight round-trip used by the health supervisor.
    async fn ping(&self) -> Result<(), PipelineError>;

    /// Stop handing out leases; pending `lease()` calls return None.
    async fn close(&self);
}
