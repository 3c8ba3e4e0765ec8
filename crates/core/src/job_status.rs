//! Backend queue status vocabulary and its normalized form.
//!
//! The backend reports job state as free-form strings (`IN_QUEUE`,
//! `IN_PROGRESS`, `COMPLETED`, ...). [`map_status`] folds them into the
//! four [`JobState`]s. Unknown strings map to `Running` so that a
//! transient, unrecognized status never aborts a healthy subscription.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Backend-native shape
// ---------------------------------------------------------------------------

/// Status object as reported by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendStatus {
    pub status: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub logs: Option<Vec<BackendLog>>,
    /// Failure description attached to terminal error statuses.
    #[serde(default)]
    pub error: Option<String>,
}

impl BackendStatus {
    /// Minimal status carrying only the state string.
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            request_id: None,
            queue_position: None,
            logs: None,
            error: None,
        }
    }

    pub fn with_queue_position(mut self, position: u32) -> Self {
        self.queue_position = Some(position);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Log line attached to a backend status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendLog {
    pub message: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalized shape
// ---------------------------------------------------------------------------

/// Log level applied when the backend does not specify one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Normalized job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Map a backend status string. Unrecognized values are `Running`.
    pub fn from_backend(status: &str) -> Self {
        match status {
            "IN_QUEUE" | "QUEUED" | "PENDING" => JobState::Queued,
            "IN_PROGRESS" | "RUNNING" | "PROCESSING" => JobState::Running,
            "COMPLETED" | "OK" | "SUCCEEDED" => JobState::Completed,
            "FAILED" | "ERROR" | "CANCELLED" => JobState::Failed,
            _ => JobState::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A normalized log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Normalized status of one backend job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

/// Normalize a backend status.
///
/// `fallback_request_id` is used when the status object does not name
/// its own request.
pub fn map_status(raw: &BackendStatus, fallback_request_id: &str) -> JobStatus {
    let logs = raw
        .logs
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|log| LogEntry {
            message: log.message.clone(),
            level: log
                .level
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            timestamp: log.timestamp.clone(),
        })
        .collect();

    JobStatus {
        state: JobState::from_backend(&raw.status),
        request_id: raw
            .request_id
            .clone()
            .unwrap_or_else(|| fallback_request_id.to_string()),
        queue_position: raw.queue_position,
        logs,
    }
}

// ---------------------------------------------------------------------------
// Consecutive-duplicate suppression
// ---------------------------------------------------------------------------

/// Suppresses consecutive statuses with the same state and queue position.
///
/// Log content does not participate in the comparison.
#[derive(Debug, Default)]
pub struct StatusDeduper {
    last: Option<(JobState, Option<u32>)>,
}

impl StatusDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` and report whether observers should see it.
    pub fn should_emit(&mut self, status: &JobStatus) -> bool {
        let key = (status.state, status.queue_position);
        if self.last == Some(key) {
            return false;
        }
        self.last = Some(key);
        true
    }
}
