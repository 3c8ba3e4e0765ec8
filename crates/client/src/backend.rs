//! The generation backend seen by the orchestrator.
//!
//! [`GenerationBackend`] is the only seam between the orchestration
//! engine and the remote queue. [`crate::api::HttpQueueBackend`] is the
//! production implementation; tests substitute in-memory doubles.

use async_trait::async_trait;
use genqueue_core::backend_error::BackendError;
use genqueue_core::job_status::BackendStatus;
use tokio::sync::mpsc;

use crate::messages::SubmitResponse;

/// Channel on which a subscription pushes raw status updates.
pub type StatusSender = mpsc::UnboundedSender<BackendStatus>;

/// Successful settlement of a backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResult {
    pub data: serde_json::Value,
    pub request_id: String,
}

/// Remote queue-based generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Enqueue a request without waiting for it.
    async fn submit(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<SubmitResponse, BackendError>;

    /// Enqueue a request and wait for its result, pushing every observed
    /// status to `updates` before settling. Send failures on `updates`
    /// must be ignored: the receiver goes away once the caller stops
    /// waiting.
    async fn subscribe(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
        updates: StatusSender,
    ) -> Result<BackendResult, BackendError>;

    /// Execute a request synchronously, with no intermediate status.
    async fn run(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<BackendResult, BackendError>;

    /// Fetch the current status of a queued request.
    async fn status(&self, endpoint: &str, request_id: &str)
        -> Result<BackendStatus, BackendError>;

    /// Fetch the result payload of a completed request.
    async fn result(
        &self,
        endpoint: &str,
        request_id: &str,
    ) -> Result<serde_json::Value, BackendError>;

    /// Ask the backend to drop a queued or running request.
    async fn cancel(&self, endpoint: &str, request_id: &str) -> Result<(), BackendError>;
}
