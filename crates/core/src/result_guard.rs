//! Validation of completed job payloads before they reach the caller.
//!
//! Two independent checks:
//!
//! - **Hosted URLs**: known media fields must point at hosted files. An
//!   inline `data:...;base64,` payload means the request was sent with
//!   synchronous mode enabled, which this client does not support.
//! - **Safety flags**: a `has_nsfw_concepts` array with any `true`
//!   entry rejects the whole result.

use serde_json::Value;

use crate::generation_error::GenerationError;

/// Result fields holding a media object (`{"url": ...}`) or an array of them.
pub const MEDIA_FIELDS: &[&str] = &["image", "images", "video", "videos", "audio", "audio_file"];

/// Content-safety flag array attached by the backend.
pub const SAFETY_FLAGS_FIELD: &str = "has_nsfw_concepts";

/// Validate a successful payload. Returns the first violation found.
pub fn check_result(data: &Value) -> Result<(), GenerationError> {
    check_hosted_urls(data)?;
    check_safety_flags(data)
}

/// Whether a URL is an inline base64 data URI.
pub fn is_inline_data_url(url: &str) -> bool {
    url.starts_with("data:") && url.contains(";base64,")
}

fn check_hosted_urls(data: &Value) -> Result<(), GenerationError> {
    for &field in MEDIA_FIELDS {
        match data.get(field) {
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    check_media_object(item, || format!("{field}[{i}].url"))?;
                }
            }
            Some(item) => check_media_object(item, || format!("{field}.url"))?,
            None => {}
        }
    }
    Ok(())
}

fn check_media_object(item: &Value, path: impl FnOnce() -> String) -> Result<(), GenerationError> {
    match item.get("url").and_then(Value::as_str) {
        Some(url) if is_inline_data_url(url) => {
            Err(GenerationError::InlineMedia { field: path() })
        }
        _ => Ok(()),
    }
}

fn check_safety_flags(data: &Value) -> Result<(), GenerationError> {
    let Some(flags) = data.get(SAFETY_FLAGS_FIELD).and_then(Value::as_array) else {
        return Ok(());
    };
    let flagged = flags.iter().filter(|f| f.as_bool() == Some(true)).count();
    if flagged > 0 {
        return Err(GenerationError::ContentPolicyViolation { flagged });
    }
    Ok(())
}
