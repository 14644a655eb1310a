//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff between attempts of a failed task.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay. The first retry waits `base_delay * multiplier`.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(200))
    }
}

impl RetryPolicy {
    /// Doubling backoff from `base_delay`, capped at one minute.
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// delay = base_delay * multiplier^retry, capped at `max_delay`.
    ///
    /// Example with base_delay=100ms, multiplier=2.0:
    /// - retry 1: 200ms
    /// - retry 2: 400ms
    /// - retry 3: 800ms
    pub fn next_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}
