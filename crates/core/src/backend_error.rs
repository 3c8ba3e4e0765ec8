//! Failures produced at the boundary where a backend call is made.
//!
//! Transport adapters convert whatever their client library raises into
//! one of these variants, so that categorization works on a closed set
//! instead of probing error shapes at runtime.

/// A failed call to the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with a non-success HTTP-like status code.
    #[error("Backend returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The connection could not be established or was dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport gave up waiting for a response.
    #[error("Transport timeout: {0}")]
    Timeout(String),

    /// The job ran on the backend and reported a failure.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// The response could not be decoded.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// Anything else, carrying the original message.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// The explicit status code, when the failure carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            BackendError::Status { message, .. } => message,
            BackendError::Connection(msg)
            | BackendError::Timeout(msg)
            | BackendError::JobFailed(msg)
            | BackendError::Decode(msg)
            | BackendError::Other(msg) => msg,
        }
    }
}
