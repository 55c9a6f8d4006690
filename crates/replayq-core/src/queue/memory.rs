//! In-memory queue implementation.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Disposition, JobQueue, Lease, RetryPolicy};
use crate::domain::JobTask;
use crate::error::PipelineError;

/// One hand-out of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivery {
    task: JobTask,
    attempt: u32,
    last_error: Option<String>,
}

/// Scheduled retry entry for the priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
/// `seq` keeps retries due at the same instant in FIFO order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledDelivery {
    run_at: Instant,
    seq: u64,
    delivery: Delivery,
}

impl PartialOrd for ScheduledDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledDelivery {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// In-memory queue state.
#[derive(Default)]
struct QueueState {
    /// Ready FIFO.
    ready: VecDeque<Delivery>,

    /// Retry backoff.
    scheduled: BinaryHeap<ScheduledDelivery>,

    /// Leased and not yet acked/failed.
    in_flight: usize,

    next_seq: u64,
    closed: bool,
}

impl QueueState {
    /// Move retries from scheduled to ready if their time has come.
    fn promote_scheduled(&mut self, now: Instant) {
        while self.scheduled.peek().is_some_and(|entry| entry.run_at <= now) {
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.delivery);
            }
        }
    }

    fn schedule(&mut self, delivery: Delivery, run_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.push(ScheduledDelivery {
            run_at,
            seq,
            delivery,
        });
    }
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    retry_policy: RetryPolicy,
}

/// In-memory queue. Retries live only as long as the process; the job rows are
/// what survives a restart (see `Pipeline::recover_queued`).
#[derive(Clone)]
pub struct InMemoryQueue {
    shared: Arc<Shared>,
}

impl InMemoryQueue {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                retry_policy,
            }),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.retry_policy
    }

    /// Leased deliveries not yet acked or failed.
    pub async fn in_flight(&self) -> usize {
        self.shared.state.lock().await.in_flight
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, task: JobTask) -> Result<(), PipelineError> {
        {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(PipelineError::Persistence("queue is closed".to_string()));
            }
            state.ready.push_back(Delivery {
                task,
                attempt: 1,
                last_error: None,
            });
        }

        // Notify waiting workers
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn lease(&self) -> Option<Box<dyn Lease>> {
        loop {
            // Register interest before looking at the state so a close() or
            // enqueue() between the check and the wait is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.shared.state.lock().await;
                if state.closed {
                    return None;
                }
                state.promote_scheduled(Instant::now());

                if let Some(delivery) = state.ready.pop_front() {
                    state.in_flight += 1;
                    let more_ready = !state.ready.is_empty();
                    drop(state);

                    // Pass the wake-up along if other tasks are still waiting.
                    if more_ready {
                        self.shared.notify.notify_one();
                    }
                    return Some(Box::new(InMemoryLease {
                        delivery,
                        shared: Arc::clone(&self.shared),
                    }));
                }

                // No ready tasks - check if we have scheduled retries
                state.scheduled.peek().map(|entry| entry.run_at)
            };

            // Wait for notification OR next scheduled retry
            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(wake_at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn depth(&self) -> Result<usize, PipelineError> {
        let state = self.shared.state.lock().await;
        Ok(state.ready.len() + state.scheduled.len())
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        if self.shared.state.lock().await.closed {
            return Err(PipelineError::TransientDependency(
                "queue is closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn close(&self) {
        self.shared.state.lock().await.closed = true;
        self.shared.notify.notify_waiters();
    }
}

/// Lease implementation for InMemoryQueue.
struct InMemoryLease {
    delivery: Delivery,
    shared: Arc<Shared>,
}

#[async_trait]
impl Lease for InMemoryLease {
    fn task(&self) -> &JobTask {
        &self.delivery.task
    }

    fn attempt(&self) -> u32 {
        self.delivery.attempt
    }

    fn last_error(&self) -> Option<&str> {
        self.delivery.last_error.as_deref()
    }

    async fn ack(self: Box<Self>) -> Result<(), PipelineError> {
        let mut state = self.shared.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        Ok(())
    }

    async fn fail(
        self: Box<Self>,
        error: &str,
        retryable: bool,
    ) -> Result<Disposition, PipelineError> {
        let disposition = {
            let mut state = self.shared.state.lock().await;
            state.in_flight = state.in_flight.saturating_sub(1);

            match self
                .shared
                .retry_policy
                .decide(self.delivery.attempt, retryable)
            {
                Disposition::RetryScheduled { .. } if state.closed => Disposition::Dropped,
                Disposition::RetryScheduled { delay, attempt } => {
                    let delivery = Delivery {
                        task: self.delivery.task.clone(),
                        attempt,
                        last_error: Some(error.to_string()),
                    };
                    state.schedule(delivery, Instant::now() + delay);
                    Disposition::RetryScheduled { delay, attempt }
                }
                other => other,
            }
        }; // Lock released here

        // Notify outside the lock so a sleeping worker re-computes its wake time
        if matches!(disposition, Disposition::RetryScheduled { .. }) {
            self.shared.notify.notify_one();
        }

        Ok(disposition)
    }
}
