//! Caller-input bounds checked before any network call.

use std::time::Duration;

use crate::error::CoreError;

/// Upper bound on a subscription timeout (one hour).
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Timeout applied when the caller does not provide one (five minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Validate a subscription timeout: `0 < timeout_ms <= MAX_TIMEOUT_MS`.
pub fn validate_timeout_ms(timeout_ms: u64) -> Result<Duration, CoreError> {
    if timeout_ms == 0 {
        return Err(CoreError::Validation(
            "timeout_ms must be positive".to_string(),
        ));
    }
    if timeout_ms > MAX_TIMEOUT_MS {
        return Err(CoreError::Validation(format!(
            "timeout_ms must be at most {MAX_TIMEOUT_MS}, got {timeout_ms}"
        )));
    }
    Ok(Duration::from_millis(timeout_ms))
}

/// Validate an endpoint identifier: non-empty, no surrounding whitespace.
pub fn validate_endpoint(endpoint: &str) -> Result<(), CoreError> {
    if endpoint.is_empty() || endpoint.trim() != endpoint {
        return Err(CoreError::Validation(format!(
            "Invalid endpoint '{endpoint}'"
        )));
    }
    Ok(())
}
