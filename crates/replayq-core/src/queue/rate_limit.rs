//! Dequeue rate limiter (sliding-window log).

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// At most `limit` acquisitions in any rolling `window`.
///
/// Shared by every worker of a pool; `acquire` waits until the oldest grant in the
/// window ages out.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            grants: Mutex::new(VecDeque::with_capacity(limit.max(1))),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait for a slot and take it.
    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                while grants
                    .front()
                    .is_some_and(|granted| *granted + self.window <= now)
                {
                    grants.pop_front();
                }

                if grants.len() < self.limit {
                    grants.push_back(now);
                    return;
                }

                match grants.front() {
                    Some(oldest) => *oldest + self.window,
                    None => now,
                }
            };

            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Take a slot only if one is free right now.
    pub async fn try_acquire(&self) -> bool {
        let mut grants = self.grants.lock().await;
        let now = Instant::now();
        while grants
            .front()
            .is_some_and(|granted| *granted + self.window <= now)
        {
            grants.pop_front();
        }
        if grants.len() < self.limit {
            grants.push_back(now);
            true
        } else {
            false
        }
    }
}
