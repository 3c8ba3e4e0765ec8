//! Configuration loaded from environment variables.
//!
//! Every field has a default suitable for local development. Values that
//! are present but malformed are reported as [`ConfigError`] rather than
//! silently replaced.

use std::str::FromStr;
use std::time::Duration;

use genqueue_core::limits::{validate_timeout_ms, DEFAULT_TIMEOUT_MS};

/// Default queue API base URL.
pub const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";
/// Default synchronous API base URL.
pub const DEFAULT_RUN_URL: &str = "https://fal.run";
/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
/// Default per-HTTP-request timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
/// Broadcast channel capacity for orchestrator events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Read and parse an optional environment variable.
fn env_parse<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Behaviour of the orchestration engine.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Timeout applied when a caller does not pass one, and to `run`.
    pub default_timeout_ms: u64,
    /// Ask the backend to drop a request after a local cancel or timeout.
    pub cancel_remote_on_abort: bool,
    /// Capacity of the orchestrator event broadcast channel.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            cancel_remote_on_abort: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default  |
    /// |-------------------------------|----------|
    /// | `GENQUEUE_DEFAULT_TIMEOUT_MS` | `300000` |
    /// | `GENQUEUE_CANCEL_REMOTE`      | `true`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_timeout_ms = match env_parse::<u64>("GENQUEUE_DEFAULT_TIMEOUT_MS")? {
            Some(ms) => {
                validate_timeout_ms(ms).map_err(|_| ConfigError::Invalid {
                    var: "GENQUEUE_DEFAULT_TIMEOUT_MS",
                    value: ms.to_string(),
                })?;
                ms
            }
            None => defaults.default_timeout_ms,
        };

        let cancel_remote_on_abort = env_parse::<bool>("GENQUEUE_CANCEL_REMOTE")?
            .unwrap_or(defaults.cancel_remote_on_abort);

        Ok(Self {
            default_timeout_ms,
            cancel_remote_on_abort,
            ..defaults
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Connection settings for [`crate::api::HttpQueueBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the queue API, e.g. `https://queue.fal.run`.
    pub queue_url: String,
    /// Base URL of the synchronous API, e.g. `https://fal.run`.
    pub run_url: String,
    /// API key sent as `Authorization: Key <key>`.
    pub api_key: Option<String>,
    /// Delay between status polls during a subscription.
    pub poll_interval: Duration,
    /// Timeout for each individual HTTP request.
    pub request_timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            run_url: DEFAULT_RUN_URL.to_string(),
            api_key: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl HttpBackendConfig {
    /// Configuration pointing both APIs at one base URL (used in tests and
    /// for self-hosted gateways).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            queue_url: base_url.clone(),
            run_url: base_url,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `GENQUEUE_QUEUE_URL`        | `https://queue.fal.run` |
    /// | `GENQUEUE_RUN_URL`          | `https://fal.run`       |
    /// | `GENQUEUE_API_KEY`          | unset                   |
    /// | `GENQUEUE_POLL_INTERVAL_MS` | `500`                   |
    /// | `GENQUEUE_HTTP_TIMEOUT_SECS`| `60`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let queue_url = std::env::var("GENQUEUE_QUEUE_URL").unwrap_or(defaults.queue_url);
        let run_url = std::env::var("GENQUEUE_RUN_URL").unwrap_or(defaults.run_url);
        let api_key = std::env::var("GENQUEUE_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let poll_interval = env_parse::<u64>("GENQUEUE_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let request_timeout = env_parse::<u64>("GENQUEUE_HTTP_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        Ok(Self {
            queue_url: queue_url.trim_end_matches('/').to_string(),
            run_url: run_url.trim_end_matches('/').to_string(),
            api_key,
            poll_interval,
            request_timeout,
        })
    }
}
