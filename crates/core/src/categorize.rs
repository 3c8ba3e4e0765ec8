//! Backend failure categorization.
//!
//! Maps a [`BackendError`] to an [`ErrorInfo`] with a stable
//! [`ErrorKind`] and a retryability verdict. Priority order:
//!
//! 1. Explicit status code, through a fixed table.
//! 2. Transport variants that already name their kind.
//! 3. Lower-cased message against ordered keyword groups.
//! 4. [`ErrorKind::Unknown`].
//!
//! Retryability depends on the kind alone.

use std::fmt;

use serde::Serialize;

use crate::backend_error::BackendError;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable failure taxonomy exposed to every caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    Timeout,
    ApiError,
    Validation,
    ContentPolicy,
    RateLimit,
    Auth,
    QuotaExceeded,
    NotFound,
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed when retried.
    ///
    /// Exactly `Network`, `Timeout` and `RateLimit` are retryable.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ApiError => "API_ERROR",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::ContentPolicy => "CONTENT_POLICY",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::Auth => "AUTH",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Map an explicit status code. Unlisted codes are still backend
    /// faults and yield `ApiError`.
    pub fn from_status_code(status: u16) -> Self {
        match status {
            400 | 422 => ErrorKind::Validation,
            401 | 403 => ErrorKind::Auth,
            402 => ErrorKind::QuotaExceeded,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimit,
            _ => ErrorKind::ApiError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finer classification inside a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDetail {
    /// The input image is below the model's minimum dimensions.
    ImageTooSmall,
}

// ---------------------------------------------------------------------------
// ErrorInfo
// ---------------------------------------------------------------------------

/// Normalized description of a failure. Only produced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    kind: ErrorKind,
    retryable: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<ErrorDetail>,
}

impl ErrorInfo {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            message: message.into(),
            status_code: None,
            detail: None,
        }
    }

    fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn detail(&self) -> Option<ErrorDetail> {
        self.detail
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "{} ({status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Keyword groups
// ---------------------------------------------------------------------------

const NETWORK_TERMS: &[&str] = &[
    "network",
    "econnrefused",
    "econnreset",
    "enotfound",
    "fetch failed",
    "failed to fetch",
    "socket hang up",
    "connection",
];

const TIMEOUT_TERMS: &[&str] = &["timeout", "timed out", "etimedout", "deadline exceeded"];

const CONTENT_POLICY_TERMS: &[&str] = &[
    "nsfw",
    "content policy",
    "content_policy",
    "safety checker",
    "inappropriate",
];

const DIMENSION_TERMS: &[&str] = &[
    "too small",
    "dimension",
    "minimum size",
    "resolution too low",
];

fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| haystack.contains(term))
}

// ---------------------------------------------------------------------------
// Categorization
// ---------------------------------------------------------------------------

/// Classify a backend failure.
pub fn categorize(error: &BackendError) -> ErrorInfo {
    let message = error.message();

    if let Some(status) = error.status_code() {
        return ErrorInfo::new(ErrorKind::from_status_code(status), message)
            .with_status_code(status);
    }

    match error {
        BackendError::Connection(_) => return ErrorInfo::new(ErrorKind::Network, message),
        BackendError::Timeout(_) => return ErrorInfo::new(ErrorKind::Timeout, message),
        _ => {}
    }

    categorize_message(message)
}

/// Classify a bare message by keyword. First matching group wins.
pub fn categorize_message(message: &str) -> ErrorInfo {
    let lowered = message.to_lowercase();

    if contains_any(&lowered, NETWORK_TERMS) {
        ErrorInfo::new(ErrorKind::Network, message)
    } else if contains_any(&lowered, TIMEOUT_TERMS) {
        ErrorInfo::new(ErrorKind::Timeout, message)
    } else if contains_any(&lowered, CONTENT_POLICY_TERMS) {
        ErrorInfo::new(ErrorKind::ContentPolicy, message)
    } else if contains_any(&lowered, DIMENSION_TERMS) {
        ErrorInfo::new(ErrorKind::Validation, message).with_detail(ErrorDetail::ImageTooSmall)
    } else {
        ErrorInfo::new(ErrorKind::Unknown, message)
    }
}
