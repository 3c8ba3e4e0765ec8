//! Exponential-backoff retry loop for generation requests.
//!
//! [`retry_generation`] re-issues a request while it fails with a
//! retryable error (see [`GenerationError::is_retryable`]) and the
//! [`RetryPolicy`] still allows attempts. Waiting between attempts
//! respects the [`CancellationToken`].

use std::future::Future;

use genqueue_core::generation_error::GenerationError;
use genqueue_core::retry::{next_delay, RetryPolicy};
use tokio_util::sync::CancellationToken;

/// Run `attempt` until it succeeds, fails permanently, or the policy is
/// exhausted. `attempt` receives the 1-based attempt number.
///
/// Returns [`GenerationError::Cancelled`] if `cancel` fires while waiting
/// for the next attempt.
pub async fn retry_generation<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, GenerationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut delay = policy.initial_delay;
    let mut number = 0u32;

    loop {
        number += 1;
        let error = match attempt(number).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() || !policy.allows_retry_after(number) {
            return Err(error);
        }

        tracing::warn!(
            attempt = number,
            kind = %error.kind(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retryable generation failure, backing off",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, policy);
    }
}
