//! Retry policy: decides delivery attempt count and backoff delays.

use std::time::Duration;

/// Exponential backoff between delivery attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Attempt ceiling, first try included. Never retried past this.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// 3 attempts with 1s, 2s between them.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try, given how many attempts already ran
    /// (1-indexed): delay = base_delay * multiplier^(attempts - 1).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}
