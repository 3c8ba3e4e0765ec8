//! Exponential-backoff parameters for retrying retryable failures.
//!
//! Only the delay arithmetic lives here; the async loop that sleeps and
//! re-issues requests is `genqueue_client::retry`.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}
