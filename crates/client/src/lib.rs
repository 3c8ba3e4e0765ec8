//! Client-side orchestration for queue-based generation backends.
//!
//! Provides the backend seam ([`backend::GenerationBackend`]) and its HTTP
//! implementation, the in-flight request registry, the subscription
//! orchestrator that deduplicates, times out and cancels requests, a
//! retry loop for retryable failures, and lifecycle events.

pub mod api;
pub mod backend;
pub mod config;
pub mod events;
pub mod messages;
pub mod orchestrator;
pub mod registry;
pub mod retry;

pub use api::HttpQueueBackend;
pub use backend::{BackendResult, GenerationBackend};
pub use config::{HttpBackendConfig, OrchestratorConfig};
pub use orchestrator::{
    GenerationOutcome, GenerationResult, Orchestrator, PendingRequest, RunOptions,
    SubscribeOptions,
};
pub use registry::ActiveRequestRegistry;
