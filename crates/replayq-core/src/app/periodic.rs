//! Periodic ticker - 定期実行タスク
//!
//! 各タスクは独立した周期で動く。最初の tick は 1 周期後。
//! tick が周期より長引いた場合、遅れた tick は 1 回だけすぐ実行され、
//! 以降はそこから 1 周期ごと（溜まった分を連発しない）。
//! tick が panic しても、そのタスクの次の tick は予定どおり動く。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// One cycle. Errors are the task's own business (log and wait for the next tick).
    async fn tick(&self);
}

/// Drive `task` every `every` until `shutdown` turns true (or its sender is dropped).
pub fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    debug!(task = task.name(), "tick");
                    // A panicking tick only takes down its own task.
                    let running = Arc::clone(&task);
                    if let Err(e) = tokio::spawn(async move { running.tick().await }).await {
                        error!(task = task.name(), error = %e, "tick aborted");
                    }
                }
            }
        }
        debug!(task = task.name(), "periodic task stopped");
    })
}

/// A set of periodic tasks sharing one shutdown signal.
pub struct PeriodicSet {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Default for PeriodicSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicSet {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    pub fn spawn(&mut self, task: Arc<dyn PeriodicTask>, every: Duration) {
        info!(task = task.name(), every_secs = every.as_secs(), "periodic task scheduled");
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(spawn_periodic(task, every, rx));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Signal every task and wait for the running ticks to finish.
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        for j in self.joins {
            let _ = j.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Slow {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(25)).await;
        }
    }

    struct PanicsFirst {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for PanicsFirst {
        fn name(&self) -> &'static str {
            "panics_first"
        }

        async fn tick(&self) {
            if self.ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("store returned garbage");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_period() {
        let counter = Arc::new(Counter::default());
        let mut set = PeriodicSet::new();
        set.spawn(counter.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 3);

        set.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ticks_are_not_replayed() {
        let slow = Arc::new(Slow {
            ticks: AtomicUsize::new(0),
        });
        let mut set = PeriodicSet::new();
        set.spawn(slow.clone(), Duration::from_secs(10));

        // ticks start at 10s, 35s (late, once) and 60s
        tokio::time::sleep(Duration::from_secs(34)).await;
        assert_eq!(slow.ticks.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(slow.ticks.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(23)).await;
        assert_eq!(slow.ticks.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(slow.ticks.load(Ordering::SeqCst), 3);

        set.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tick_does_not_stop_the_schedule() {
        let task = Arc::new(PanicsFirst {
            ticks: AtomicUsize::new(0),
        });
        let mut set = PeriodicSet::new();
        set.spawn(task.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(task.ticks.load(Ordering::SeqCst), 3);

        set.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_ticking() {
        let counter = Arc::new(Counter::default());
        let mut set = PeriodicSet::new();
        set.spawn(counter.clone(), Duration::from_secs(1));
        assert_eq!(set.len(), 1);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        set.shutdown_and_join().await;
        let after_shutdown = counter.ticks.load(Ordering::SeqCst);
        assert_eq!(after_shutdown, 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), after_shutdown);
    }
}
