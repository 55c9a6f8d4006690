//! Retry policy: decides backoff delays and when to give up.

use std::time::Duration;

use super::Disposition;

/// Retry policy for failed deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single backoff.
    pub max_delay: Duration,

    /// Total deliveries allowed, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before re-delivering after the `attempt`-th delivery failed.
    ///
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    ///
    /// With base_delay=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - attempt 6: 60s (capped)
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// What happens to a delivery that failed on its `attempt`-th try.
    pub fn decide(&self, attempt: u32, retryable: bool) -> Disposition {
        if retryable && attempt < self.max_attempts {
            Disposition::RetryScheduled {
                delay: self.next_delay(attempt),
                attempt: attempt + 1,
            }
        } else {
            Disposition::Exhausted { attempts: attempt }
        }
    }
}
