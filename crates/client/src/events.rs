//! Lifecycle events emitted by the orchestrator.
//!
//! Broadcast on a [`tokio::sync::broadcast`] channel; call
//! [`crate::orchestrator::Orchestrator::events`] to receive them. Events
//! published with no receiver attached are dropped.

use genqueue_core::categorize::ErrorInfo;
use genqueue_core::fingerprint::RequestFingerprint;
use genqueue_core::job_status::JobStatus;
use serde::Serialize;

/// A state change of one orchestrated request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A new backend call was issued for this fingerprint.
    RequestStarted {
        fingerprint: RequestFingerprint,
        endpoint: String,
    },

    /// A caller joined an already in-flight request.
    RequestDeduplicated { fingerprint: RequestFingerprint },

    /// The backend reported a new (non-duplicate) status.
    StatusChanged {
        fingerprint: RequestFingerprint,
        status: JobStatus,
    },

    /// The request resolved with a validated result.
    RequestCompleted {
        fingerprint: RequestFingerprint,
        request_id: String,
    },

    /// The request was rejected.
    RequestFailed {
        fingerprint: RequestFingerprint,
        error: ErrorInfo,
    },

    /// The request was cancelled by its caller or by a cancel-all.
    RequestCancelled { fingerprint: RequestFingerprint },
}

impl OrchestratorEvent {
    /// Fingerprint of the request the event belongs to.
    pub fn fingerprint(&self) -> &RequestFingerprint {
        match self {
            OrchestratorEvent::RequestStarted { fingerprint, .. }
            | OrchestratorEvent::RequestDeduplicated { fingerprint }
            | OrchestratorEvent::StatusChanged { fingerprint, .. }
            | OrchestratorEvent::RequestCompleted { fingerprint, .. }
            | OrchestratorEvent::RequestFailed { fingerprint, .. }
            | OrchestratorEvent::RequestCancelled { fingerprint } => fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genqueue_core::fingerprint::fingerprint;

    #[test]
    fn serializes_with_type_tag() {
        let event = OrchestratorEvent::RequestCancelled {
            fingerprint: fingerprint("e", &serde_json::json!({})),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "request_cancelled");
        assert!(json["fingerprint"].as_str().unwrap().starts_with("e#"));
    }
}
