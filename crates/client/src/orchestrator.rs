//! Subscription orchestration.
//!
//! [`Orchestrator`] turns a `(endpoint, payload)` pair into exactly one
//! in-flight backend call, no matter how many callers ask for it at once.
//! For each new request it spawns a driver task that races three signals:
//!
//! - the backend call, which may push status updates before settling;
//! - the timeout timer;
//! - the request's cancellation token.
//!
//! The first signal to settle decides the outcome; the losing futures are
//! dropped with the race, so a late timer or cancellation cannot touch it.
//! A [`Settlement`] owned by the task then removes the registry entry and
//! publishes the outcome to every caller through a shared future. The
//! same guard runs on every other exit path, including a panic.
//!
//! Lifecycle per request: `PENDING -> (STREAMING)* -> RESOLVED | REJECTED`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use genqueue_core::backend_error::BackendError;
use genqueue_core::fingerprint::{fingerprint, RequestFingerprint};
use genqueue_core::generation_error::GenerationError;
use genqueue_core::job_status::{map_status, BackendStatus, JobStatus, StatusDeduper};
use genqueue_core::limits::{validate_endpoint, validate_timeout_ms};
use genqueue_core::result_guard::check_result;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{BackendResult, GenerationBackend};
use crate::config::OrchestratorConfig;
use crate::events::OrchestratorEvent;
use crate::registry::{ActiveRequest, ActiveRequestRegistry, Registration, SharedOutcome};

/// Fingerprint namespace for `run` so it never joins a `subscribe`.
const RUN_NAMESPACE: &str = "run:";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A validated result handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub request_id: String,
    pub data: serde_json::Value,
}

pub type GenerationOutcome = Result<GenerationResult, GenerationError>;

/// Receives every non-duplicate normalized status.
pub type StatusObserver = Arc<dyn Fn(&JobStatus) + Send + Sync>;
/// Receives coarse progress percentages (0 at start, 100 on success, 0 on failure).
pub type ProgressObserver = Arc<dyn Fn(u8) + Send + Sync>;
/// Receives the validated result before it is returned.
pub type ResultObserver = Arc<dyn Fn(&GenerationResult) + Send + Sync>;

/// Options for [`Orchestrator::subscribe`].
///
/// Observers belong to the caller that started the backend call; callers
/// that join an in-flight request only observe its outcome.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Deadline in milliseconds; `0 < timeout_ms <= 3_600_000`.
    pub timeout_ms: Option<u64>,
    pub on_queue_update: Option<StatusObserver>,
    pub on_progress: Option<ProgressObserver>,
    pub on_result: Option<ResultObserver>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn on_queue_update(mut self, f: impl Fn(&JobStatus) + Send + Sync + 'static) -> Self {
        self.on_queue_update = Some(Arc::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_result(mut self, f: impl Fn(&GenerationResult) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(f));
        self
    }
}

/// Options for [`Orchestrator::run`].
#[derive(Clone, Default)]
pub struct RunOptions {
    pub on_progress: Option<ProgressObserver>,
    pub cancellation_token: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

/// Handle to an orchestrated request. Await it for the outcome.
///
/// Cloning or dropping a handle never affects the request itself; the
/// backend call runs to settlement in its own task.
#[derive(Clone)]
pub struct PendingRequest {
    fingerprint: RequestFingerprint,
    deduplicated: bool,
    outcome: SharedOutcome,
}

impl PendingRequest {
    fn rejected(fingerprint: RequestFingerprint, error: GenerationError) -> Self {
        Self {
            fingerprint,
            deduplicated: false,
            outcome: future::ready(Err(error)).boxed().shared(),
        }
    }

    pub fn fingerprint(&self) -> &RequestFingerprint {
        &self.fingerprint
    }

    /// Whether this handle joined a request started by another caller.
    pub fn is_deduplicated(&self) -> bool {
        self.deduplicated
    }
}

impl Future for PendingRequest {
    type Output = GenerationOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.outcome.poll_unpin(cx)
    }
}

// ---------------------------------------------------------------------------
// Settlement guard
// ---------------------------------------------------------------------------

/// Owns the registry entry and the outcome sender of one request.
///
/// [`Settlement::settle`] releases the entry and publishes the outcome.
/// If the driver task ends any other way (a panicking observer or
/// backend unwinds through it), `Drop` does both instead, publishing
/// [`GenerationError::Aborted`], so the entry can never outlive the task.
struct Settlement {
    registry: Arc<ActiveRequestRegistry>,
    fingerprint: RequestFingerprint,
    entry_id: Uuid,
    cancel: CancellationToken,
    outcome_tx: Option<oneshot::Sender<GenerationOutcome>>,
}

impl Settlement {
    fn settle(&mut self, outcome: GenerationOutcome) {
        let Some(outcome_tx) = self.outcome_tx.take() else {
            return;
        };
        self.release();
        // Every receiver may have been dropped; nothing left to notify.
        let _ = outcome_tx.send(outcome);
    }

    /// Release the registry entry. Failures are logged, never returned.
    fn release(&self) {
        if let Err(e) = self.registry.release(&self.fingerprint, self.entry_id) {
            // Expected after a cancel-all cleared the table.
            if self.cancel.is_cancelled() {
                tracing::debug!(error = %e, "Registry entry already released");
            } else {
                tracing::warn!(error = %e, "Registry cleanup failed");
            }
        }
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        if self.outcome_tx.is_some() {
            tracing::error!(fingerprint = %self.fingerprint, "Request driver stopped before settling");
            self.settle(Err(GenerationError::Aborted(
                "driver task ended before settling".to_string(),
            )));
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Deduplicating, cancellable front end to a [`GenerationBackend`].
///
/// Construct once at startup and share via `Arc`. Methods that start
/// requests must be called from within a Tokio runtime.
pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<ActiveRequestRegistry>,
    config: OrchestratorConfig,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

/// Which backend call a driver issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallMode {
    Subscribe,
    Run,
}

/// Everything a driver task needs, owned so the task is `'static`.
struct Driver {
    backend: Arc<dyn GenerationBackend>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    cancel_remote_on_abort: bool,
    mode: CallMode,
    endpoint: String,
    payload: serde_json::Value,
    fingerprint: RequestFingerprint,
    cancel: CancellationToken,
    timeout: Duration,
    on_queue_update: Option<StatusObserver>,
    on_progress: Option<ProgressObserver>,
    on_result: Option<ResultObserver>,
}

/// What the race produced, plus the last backend request id seen.
struct RaceOutcome {
    outcome: GenerationOutcome,
    request_id: Option<String>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        registry: Arc<ActiveRequestRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            backend,
            registry,
            config,
            event_tx,
        }
    }

    /// Subscribe to lifecycle events of every request.
    pub fn events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &Arc<ActiveRequestRegistry> {
        &self.registry
    }

    /// Submit a request and follow it to completion.
    ///
    /// Identical in-flight requests (same endpoint, structurally equal
    /// payload) are joined rather than re-issued. Invalid input and a
    /// pre-cancelled token reject immediately without touching the
    /// backend.
    pub fn subscribe(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
        options: SubscribeOptions,
        cancellation_token: Option<CancellationToken>,
    ) -> PendingRequest {
        let fingerprint = fingerprint(endpoint, &payload);
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        self.start(
            CallMode::Subscribe,
            endpoint,
            payload,
            fingerprint,
            timeout_ms,
            cancellation_token,
            options,
        )
    }

    /// Execute a request synchronously on the backend (no queue updates).
    ///
    /// Progress is announced as 0 at start and 100 or 0 at settlement.
    /// Bounded by the configured default timeout.
    pub fn run(&self, endpoint: &str, payload: serde_json::Value, options: RunOptions) -> PendingRequest {
        let fingerprint = fingerprint(&format!("{RUN_NAMESPACE}{endpoint}"), &payload);
        let subscribe_options = SubscribeOptions {
            on_progress: options.on_progress,
            ..Default::default()
        };
        self.start(
            CallMode::Run,
            endpoint,
            payload,
            fingerprint,
            self.config.default_timeout_ms,
            options.cancellation_token,
            subscribe_options,
        )
    }

    /// Cancel the most recently started request that is still active.
    pub fn cancel_current(&self) -> bool {
        self.registry.cancel_latest()
    }

    pub fn has_active(&self) -> bool {
        self.registry.has_any()
    }

    /// Cancel every active request.
    pub fn cancel_all(&self) -> usize {
        let count = self.registry.cancel_all();
        if count > 0 {
            tracing::info!(count, "Cancelled all active requests");
        }
        count
    }

    // ---- private helpers ----

    #[allow(clippy::too_many_arguments)]
    fn start(
        &self,
        mode: CallMode,
        endpoint: &str,
        payload: serde_json::Value,
        fingerprint: RequestFingerprint,
        timeout_ms: u64,
        caller_token: Option<CancellationToken>,
        options: SubscribeOptions,
    ) -> PendingRequest {
        if caller_token.as_ref().is_some_and(|t| t.is_cancelled()) {
            tracing::debug!(fingerprint = %fingerprint, "Cancellation token already signalled");
            return PendingRequest::rejected(fingerprint, GenerationError::Cancelled);
        }

        if let Some(existing) = self.registry.lookup(&fingerprint) {
            return self.joined(existing);
        }

        if let Err(e) = validate_endpoint(endpoint) {
            return PendingRequest::rejected(fingerprint, e.into());
        }
        let timeout = match validate_timeout_ms(timeout_ms) {
            Ok(timeout) => timeout,
            Err(e) => return PendingRequest::rejected(fingerprint, e.into()),
        };

        let cancel = match &caller_token {
            Some(token) => token.child_token(),
            None => CancellationToken::new(),
        };
        let (outcome_tx, outcome_rx) = oneshot::channel::<GenerationOutcome>();
        let outcome: SharedOutcome = outcome_rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(GenerationError::Aborted(
                        "driver task ended before settling".to_string(),
                    ))
                })
            })
            .boxed()
            .shared();

        let registration = self.registry.lookup_or_insert_with(&fingerprint, || {
            ActiveRequest::new(fingerprint.clone(), outcome.clone(), cancel.clone())
        });
        let entry = match registration {
            Registration::Joined(existing) => return self.joined(existing),
            Registration::Registered(entry) => entry,
        };

        tracing::info!(
            fingerprint = %fingerprint,
            endpoint,
            timeout_ms,
            "Starting generation request",
        );
        let _ = self.event_tx.send(OrchestratorEvent::RequestStarted {
            fingerprint: fingerprint.clone(),
            endpoint: endpoint.to_string(),
        });

        let mut settlement = Settlement {
            registry: Arc::clone(&self.registry),
            fingerprint: fingerprint.clone(),
            entry_id: entry.id,
            cancel: cancel.clone(),
            outcome_tx: Some(outcome_tx),
        };
        let driver = Driver {
            backend: Arc::clone(&self.backend),
            event_tx: self.event_tx.clone(),
            cancel_remote_on_abort: self.config.cancel_remote_on_abort,
            mode,
            endpoint: endpoint.to_string(),
            payload,
            fingerprint: fingerprint.clone(),
            cancel,
            timeout,
            on_queue_update: options.on_queue_update,
            on_progress: options.on_progress,
            on_result: options.on_result,
        };

        tokio::spawn(async move {
            let outcome = driver.drive().await;
            settlement.settle(outcome);
        });

        PendingRequest {
            fingerprint,
            deduplicated: false,
            outcome,
        }
    }

    fn joined(&self, existing: ActiveRequest) -> PendingRequest {
        tracing::debug!(fingerprint = %existing.fingerprint, "Joining in-flight request");
        let _ = self.event_tx.send(OrchestratorEvent::RequestDeduplicated {
            fingerprint: existing.fingerprint.clone(),
        });
        PendingRequest {
            fingerprint: existing.fingerprint,
            deduplicated: true,
            outcome: existing.outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

impl Driver {
    /// Run the race and notify terminal observers once.
    async fn drive(self) -> GenerationOutcome {
        if let Some(observer) = &self.on_progress {
            observer(0);
        }

        let RaceOutcome {
            outcome,
            request_id,
        } = self.race().await;

        self.report(&outcome);

        if matches!(
            outcome,
            Err(GenerationError::Cancelled | GenerationError::TimedOut { .. })
        ) {
            self.cancel_remote(request_id);
        }

        outcome
    }

    /// Race the backend call against the timer and the cancellation token.
    async fn race(&self) -> RaceOutcome {
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<BackendStatus>();
        let call: BoxFuture<'_, Result<BackendResult, BackendError>> = match self.mode {
            CallMode::Subscribe => self.backend.subscribe(&self.endpoint, &self.payload, updates_tx),
            CallMode::Run => {
                drop(updates_tx);
                self.backend.run(&self.endpoint, &self.payload)
            }
        };
        tokio::pin!(call);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut dedup = StatusDeduper::new();
        let mut request_id: Option<String> = None;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break Err(GenerationError::Cancelled);
                }
                _ = &mut deadline => {
                    break Err(GenerationError::TimedOut {
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                Some(raw) = updates_rx.recv() => {
                    self.forward(&mut dedup, &mut request_id, raw);
                }
                result = &mut call => {
                    // Updates pushed right before settling are delivered first.
                    while let Ok(raw) = updates_rx.try_recv() {
                        self.forward(&mut dedup, &mut request_id, raw);
                    }
                    break self.validate(result);
                }
            }
        };

        RaceOutcome {
            outcome,
            request_id,
        }
    }

    /// Normalize a raw status and pass it on unless it repeats the last one.
    fn forward(
        &self,
        dedup: &mut StatusDeduper,
        request_id: &mut Option<String>,
        raw: BackendStatus,
    ) {
        let fallback = request_id.as_deref().unwrap_or_default().to_string();
        let status = map_status(&raw, &fallback);
        if !status.request_id.is_empty() {
            *request_id = Some(status.request_id.clone());
        }

        if !dedup.should_emit(&status) {
            tracing::trace!(fingerprint = %self.fingerprint, state = ?status.state, "Duplicate status suppressed");
            return;
        }

        tracing::debug!(
            fingerprint = %self.fingerprint,
            request_id = %status.request_id,
            state = ?status.state,
            queue_position = ?status.queue_position,
            "Job status changed",
        );
        if let Some(observer) = &self.on_queue_update {
            observer(&status);
        }
        let _ = self.event_tx.send(OrchestratorEvent::StatusChanged {
            fingerprint: self.fingerprint.clone(),
            status,
        });
    }

    /// Categorize a failure or guard a success.
    fn validate(&self, result: Result<BackendResult, BackendError>) -> GenerationOutcome {
        let result = result?;
        check_result(&result.data)?;
        Ok(GenerationResult {
            request_id: result.request_id,
            data: result.data,
        })
    }

    /// Log the outcome and notify terminal observers. Called once, after
    /// the race.
    fn report(&self, outcome: &GenerationOutcome) {
        match outcome {
            Ok(result) => {
                tracing::info!(
                    fingerprint = %self.fingerprint,
                    request_id = %result.request_id,
                    "Generation request completed",
                );
                if let Some(observer) = &self.on_result {
                    observer(result);
                }
                if let Some(observer) = &self.on_progress {
                    observer(100);
                }
                let _ = self.event_tx.send(OrchestratorEvent::RequestCompleted {
                    fingerprint: self.fingerprint.clone(),
                    request_id: result.request_id.clone(),
                });
            }
            Err(GenerationError::Cancelled) => {
                tracing::info!(fingerprint = %self.fingerprint, "Generation request cancelled");
                if let Some(observer) = &self.on_progress {
                    observer(0);
                }
                let _ = self.event_tx.send(OrchestratorEvent::RequestCancelled {
                    fingerprint: self.fingerprint.clone(),
                });
            }
            Err(e) => {
                let info = e.info();
                tracing::warn!(
                    fingerprint = %self.fingerprint,
                    kind = %info.kind(),
                    retryable = info.is_retryable(),
                    error = %e,
                    "Generation request failed",
                );
                if let Some(observer) = &self.on_progress {
                    observer(0);
                }
                let _ = self.event_tx.send(OrchestratorEvent::RequestFailed {
                    fingerprint: self.fingerprint.clone(),
                    error: info,
                });
            }
        }
    }

    /// Ask the backend to drop a request we stopped waiting for.
    fn cancel_remote(&self, request_id: Option<String>) {
        let Some(request_id) = request_id else {
            return;
        };
        if !self.cancel_remote_on_abort || self.mode == CallMode::Run {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.cancel(&endpoint, &request_id).await {
                tracing::warn!(
                    endpoint = %endpoint,
                    request_id = %request_id,
                    error = %e,
                    "Failed to cancel remote request",
                );
            }
        });
    }
}
