//! The rejection type observed by every caller of the orchestrator.
//!
//! `GenerationError` is `Clone` because a single settlement is handed
//! to every caller that joined a deduplicated request.

use crate::backend_error::BackendError;
use crate::categorize::{categorize, ErrorInfo, ErrorKind};
use crate::error::CoreError;

/// Why a generation request did not produce a usable result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The caller supplied an invalid request. Never reaches the backend.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller's cancellation token fired before the request settled.
    #[error("Request cancelled by caller")]
    Cancelled,

    /// The orchestrator's own deadline elapsed.
    #[error("Request timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    /// The backend call failed; already categorized.
    #[error("{0}")]
    Backend(ErrorInfo),

    /// A media URL field carried inline base64 data instead of a hosted URL.
    #[error(
        "Result field `{field}` contains inline base64 data instead of a hosted URL; \
         disable sync_mode on the request"
    )]
    InlineMedia { field: String },

    /// The backend flagged the output as violating its content policy.
    #[error("Content policy violation: {flagged} output(s) flagged by the safety checker")]
    ContentPolicyViolation { flagged: usize },

    /// The task driving the request ended without settling it.
    #[error("Request driver stopped unexpectedly: {0}")]
    Aborted(String),
}

impl GenerationError {
    /// Normalized `{kind, retryable}` description of this rejection.
    pub fn info(&self) -> ErrorInfo {
        match self {
            GenerationError::Backend(info) => info.clone(),
            GenerationError::InvalidRequest(_) | GenerationError::InlineMedia { .. } => {
                ErrorInfo::new(ErrorKind::Validation, self.to_string())
            }
            GenerationError::TimedOut { .. } => ErrorInfo::new(ErrorKind::Timeout, self.to_string()),
            GenerationError::ContentPolicyViolation { .. } => {
                ErrorInfo::new(ErrorKind::ContentPolicy, self.to_string())
            }
            GenerationError::Cancelled | GenerationError::Aborted(_) => {
                ErrorInfo::new(ErrorKind::Unknown, self.to_string())
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.info().kind()
    }

    pub fn is_retryable(&self) -> bool {
        self.info().is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerationError::Cancelled)
    }
}

impl From<BackendError> for GenerationError {
    fn from(err: BackendError) -> Self {
        GenerationError::Backend(categorize(&err))
    }
}

impl From<CoreError> for GenerationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => GenerationError::InvalidRequest(msg),
        }
    }
}
