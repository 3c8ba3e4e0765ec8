//! REST client for a queue-based generation API.
//!
//! Wraps the queue endpoints (submit, status, result, cancel) and the
//! synchronous run endpoint using [`reqwest`], and implements
//! [`GenerationBackend`] on top of them. A subscription is a submit
//! followed by status polling and a final result fetch.

use async_trait::async_trait;
use genqueue_core::backend_error::BackendError;
use genqueue_core::job_status::{BackendStatus, JobState};
use reqwest::header::AUTHORIZATION;
use reqwest::Method;

use crate::backend::{BackendResult, GenerationBackend, StatusSender};
use crate::config::{ConfigError, HttpBackendConfig};
use crate::messages::{error_message, parse_status, SubmitResponse};

/// HTTP implementation of [`GenerationBackend`].
pub struct HttpQueueBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpQueueBackend {
    /// Create a backend with its own connection pool.
    pub fn new(config: HttpBackendConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create a backend reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: HttpBackendConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    // ---- URLs ----

    fn submit_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.queue_url, endpoint)
    }

    fn request_url(&self, endpoint: &str, request_id: &str) -> String {
        format!("{}/{}/requests/{}", self.config.queue_url, endpoint, request_id)
    }

    fn run_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.run_url, endpoint)
    }

    // ---- private helpers ----

    /// Start a request with the auth header applied.
    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.api_key {
            Some(key) => builder.header(AUTHORIZATION, format!("Key {key}")),
            None => builder,
        }
    }

    /// Send a request, mapping transport failures and non-2xx statuses.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = builder.send().await.map_err(transport_error)?;
        ensure_success(response).await
    }

    /// Parse a successful JSON response body into the expected type.
    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a [`BackendError::Status`] carrying the
/// status and the message extracted from the body.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(BackendError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Convert a transport-level [`reqwest::Error`] into a [`BackendError`].
fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_connect() {
        BackendError::Connection(err.to_string())
    } else if err.is_decode() || err.is_body() {
        BackendError::Decode(err.to_string())
    } else if let Some(status) = err.status() {
        BackendError::Status {
            status: status.as_u16(),
            message: err.to_string(),
        }
    } else {
        BackendError::Other(err.to_string())
    }
}

#[async_trait]
impl GenerationBackend for HttpQueueBackend {
    async fn submit(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<SubmitResponse, BackendError> {
        let response: SubmitResponse = self
            .send_json(self.request(Method::POST, self.submit_url(endpoint)).json(payload))
            .await?;

        tracing::debug!(
            endpoint,
            request_id = %response.request_id,
            queue_position = ?response.queue_position,
            "Request submitted to queue",
        );
        Ok(response)
    }

    async fn subscribe(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
        updates: StatusSender,
    ) -> Result<BackendResult, BackendError> {
        let submitted = self.submit(endpoint, payload).await?;
        let request_id = submitted.request_id;

        loop {
            let mut status = self.status(endpoint, &request_id).await?;
            status
                .request_id
                .get_or_insert_with(|| request_id.clone());
            let state = JobState::from_backend(&status.status);
            let failure = status.error.clone();

            // The receiver is gone once the orchestrator settled; keep
            // polling semantics simple and ignore the send error.
            let _ = updates.send(status);

            match state {
                JobState::Completed => break,
                JobState::Failed => {
                    return Err(BackendError::JobFailed(
                        failure.unwrap_or_else(|| "Job failed without error detail".to_string()),
                    ));
                }
                JobState::Queued | JobState::Running => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        let data = self.result(endpoint, &request_id).await?;
        Ok(BackendResult { data, request_id })
    }

    async fn run(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<BackendResult, BackendError> {
        let response = self
            .send(self.request(Method::POST, self.run_url(endpoint)).json(payload))
            .await?;
        let request_id = response
            .headers()
            .get("x-fal-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let data = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(BackendResult { data, request_id })
    }

    async fn status(
        &self,
        endpoint: &str,
        request_id: &str,
    ) -> Result<BackendStatus, BackendError> {
        let url = format!("{}/status", self.request_url(endpoint, request_id));
        let response = self
            .send(self.request(Method::GET, url).query(&[("logs", "1")]))
            .await?;
        let body = response.text().await.map_err(transport_error)?;
        parse_status(&body).map_err(|e| BackendError::Decode(format!("status response: {e}")))
    }

    async fn result(
        &self,
        endpoint: &str,
        request_id: &str,
    ) -> Result<serde_json::Value, BackendError> {
        self.send_json(self.request(Method::GET, self.request_url(endpoint, request_id)))
            .await
    }

    async fn cancel(&self, endpoint: &str, request_id: &str) -> Result<(), BackendError> {
        let url = format!("{}/cancel", self.request_url(endpoint, request_id));
        self.send(self.request(Method::PUT, url)).await?;
        tracing::info!(endpoint, request_id, "Remote request cancelled");
        Ok(())
    }
}
