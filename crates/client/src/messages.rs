//! Wire payloads exchanged with the queue REST API.
//!
//! Status objects deserialize into [`BackendStatus`] from
//! `genqueue-core`; this module adds the submit response and the
//! helpers used to pull a readable message out of error bodies.

use genqueue_core::job_status::BackendStatus;
use serde::Deserialize;

/// Response returned by the queue after accepting a request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued request.
    pub request_id: String,
    /// URL to poll for status.
    #[serde(default)]
    pub status_url: String,
    /// URL to fetch the result from once completed.
    #[serde(default)]
    pub response_url: String,
    /// Position in the queue at submission time, when reported.
    #[serde(default)]
    pub queue_position: Option<u32>,
}

/// Parse a status response body.
pub fn parse_status(text: &str) -> Result<BackendStatus, serde_json::Error> {
    serde_json::from_str(text)
}

/// Extract a human-readable message from an error response body.
///
/// Understands `{"detail": "..."}`, `{"detail": [{"msg": "..."}]}`,
/// `{"message": "..."}` and `{"error": "..."}`; anything else is
/// returned verbatim.
pub fn error_message(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_string();
    };

    if let Some(detail) = value.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
    }

    for key in ["message", "error"] {
        if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
            return text.to_string();
        }
    }

    trimmed.to_string()
}
