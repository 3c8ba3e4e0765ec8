//! Integration tests for the subscription orchestrator.
//!
//! Drives [`Orchestrator`] against an in-memory backend whose calls can be
//! held open, released, or left hanging, to exercise deduplication,
//! timeouts, cancellation, status suppression and result validation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use async_trait::async_trait;
use genqueue_client::backend::{BackendResult, GenerationBackend, StatusSender};
use genqueue_client::events::OrchestratorEvent;
use genqueue_client::messages::SubmitResponse;
use genqueue_client::{
    ActiveRequestRegistry, Orchestrator, OrchestratorConfig, RunOptions, SubscribeOptions,
};
use genqueue_core::backend_error::BackendError;
use genqueue_core::categorize::ErrorKind;
use genqueue_core::generation_error::GenerationError;
use genqueue_core::job_status::{BackendStatus, JobState, JobStatus};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test backend
// ---------------------------------------------------------------------------

/// Scripted backend. Every call pushes `updates`, waits on `gate` when
/// set, then settles with `outcome` (or never, when `outcome` is `None`).
#[derive(Default)]
struct MockBackend {
    calls: AtomicUsize,
    remote_cancels: Mutex<Vec<String>>,
    updates: Vec<BackendStatus>,
    outcome: Option<Result<Value, BackendError>>,
    gate: Option<Arc<Notify>>,
}

impl MockBackend {
    fn succeeding(data: Value) -> Self {
        Self {
            outcome: Some(Ok(data)),
            ..Default::default()
        }
    }

    fn failing(error: BackendError) -> Self {
        Self {
            outcome: Some(Err(error)),
            ..Default::default()
        }
    }

    fn hanging() -> Self {
        Self::default()
    }

    fn with_updates(mut self, updates: Vec<BackendStatus>) -> Self {
        self.updates = updates;
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn settle(&self) -> Result<BackendResult, BackendError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.outcome {
            Some(Ok(data)) => Ok(BackendResult {
                data: data.clone(),
                request_id: "req-1".to_string(),
            }),
            Some(Err(e)) => Err(e.clone()),
            None => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn submit(&self, _: &str, _: &Value) -> Result<SubmitResponse, BackendError> {
        Err(BackendError::Other("submit is not scripted".into()))
    }

    async fn subscribe(
        &self,
        _endpoint: &str,
        _payload: &Value,
        updates: StatusSender,
    ) -> Result<BackendResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for update in &self.updates {
            let _ = updates.send(update.clone());
        }
        self.settle().await
    }

    async fn run(&self, _endpoint: &str, _payload: &Value) -> Result<BackendResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.settle().await
    }

    async fn status(&self, _: &str, _: &str) -> Result<BackendStatus, BackendError> {
        Err(BackendError::Other("status is not scripted".into()))
    }

    async fn result(&self, _: &str, _: &str) -> Result<Value, BackendError> {
        Err(BackendError::Other("result is not scripted".into()))
    }

    async fn cancel(&self, _endpoint: &str, request_id: &str) -> Result<(), BackendError> {
        self.remote_cancels
            .lock()
            .unwrap()
            .push(request_id.to_string());
        Ok(())
    }
}

fn orchestrator(backend: &Arc<MockBackend>) -> Orchestrator {
    Orchestrator::new(
        backend.clone(),
        Arc::new(ActiveRequestRegistry::new()),
        OrchestratorConfig::default(),
    )
}

fn hosted_image() -> Value {
    json!({"images": [{"url": "https://cdn.example.com/out.png"}], "has_nsfw_concepts": [false]})
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_concurrent_requests_share_one_backend_call() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend::succeeding(hosted_image()).gated(gate.clone()));
    let orch = orchestrator(&backend);

    let first = orch.subscribe(
        "fal-ai/flux",
        json!({"prompt": "a cat", "seed": 1}),
        SubscribeOptions::new(),
        None,
    );
    let second = orch.subscribe(
        "fal-ai/flux",
        json!({"seed": 1, "prompt": "a cat"}),
        SubscribeOptions::new(),
        None,
    );

    assert!(!first.is_deduplicated());
    assert!(second.is_deduplicated());
    assert_eq!(first.fingerprint(), second.fingerprint());

    gate.notify_one();
    let (a, b) = tokio::join!(first, second);

    assert_eq!(backend.calls(), 1);
    assert_eq!(a, b);
    assert_eq!(a.unwrap().data, hosted_image());
    assert_eq!(orch.registry().stats().deduplicated, 1);
}

#[tokio::test]
async fn settled_request_is_released_for_a_fresh_call() {
    let backend = Arc::new(MockBackend::succeeding(hosted_image()));
    let orch = orchestrator(&backend);
    let payload = json!({"prompt": "a cat"});

    orch.subscribe("e", payload.clone(), SubscribeOptions::new(), None)
        .await
        .unwrap();
    assert!(!orch.has_active());

    orch.subscribe("e", payload, SubscribeOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn panicking_observer_still_releases_the_entry() {
    let backend = Arc::new(
        MockBackend::succeeding(hosted_image())
            .with_updates(vec![BackendStatus::new("IN_QUEUE").with_queue_position(1)]),
    );
    let orch = orchestrator(&backend);
    let payload = json!({"prompt": "a cat"});

    let first = orch
        .subscribe(
            "e",
            payload.clone(),
            SubscribeOptions::new().on_queue_update(|_| panic!("observer failure")),
            None,
        )
        .await;
    assert_matches!(first, Err(GenerationError::Aborted(_)));
    assert!(!orch.has_active());

    let second = orch.subscribe("e", payload, SubscribeOptions::new(), None);
    assert!(!second.is_deduplicated());
    assert_eq!(second.await.unwrap().data, hosted_image());
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn run_and_subscribe_do_not_share_requests() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend::succeeding(hosted_image()).gated(gate.clone()));
    let orch = orchestrator(&backend);
    let payload = json!({"prompt": "a cat"});

    let subscribed = orch.subscribe("e", payload.clone(), SubscribeOptions::new(), None);
    let ran = orch.run("e", payload, RunOptions::new());
    assert!(!ran.is_deduplicated());
    assert_ne!(subscribed.fingerprint(), ran.fingerprint());

    // Let both drivers reach the backend before tearing down.
    tokio::time::sleep(Duration::from_millis(20)).await;
    orch.cancel_all();
    let _ = tokio::join!(subscribed, ran);
    assert_eq!(backend.calls(), 2);
}

// ---------------------------------------------------------------------------
// Timeout and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_rejects_and_releases_entry() {
    let backend = Arc::new(MockBackend::hanging());
    let orch = orchestrator(&backend);

    let started = Instant::now();
    let result = orch
        .subscribe(
            "e",
            json!({"prompt": "slow"}),
            SubscribeOptions::new().with_timeout_ms(100),
            None,
        )
        .await;
    let elapsed = started.elapsed();

    let err = result.unwrap_err();
    assert_eq!(err, GenerationError::TimedOut { timeout_ms: 100 });
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());
    assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(!orch.has_active());
}

#[tokio::test]
async fn cancellation_rejects_and_late_settlement_is_ignored() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(
        MockBackend::succeeding(hosted_image())
            .with_updates(vec![BackendStatus::new("IN_QUEUE").with_request_id("req-1")])
            .gated(gate.clone()),
    );
    let orch = orchestrator(&backend);
    let token = CancellationToken::new();

    let pending = orch.subscribe(
        "e",
        json!({"prompt": "a cat"}),
        SubscribeOptions::new(),
        Some(token.clone()),
    );
    // Let the driver pick up the queued status before cancelling.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(orch.has_active());

    token.cancel();
    let first = pending.clone().await;
    assert_eq!(first, Err(GenerationError::Cancelled));
    assert!(!orch.has_active());

    // The backend settling afterwards must not change anything.
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pending.await, Err(GenerationError::Cancelled));
}

#[tokio::test]
async fn cancellation_requests_remote_cancel_for_known_request_id() {
    let backend = Arc::new(
        MockBackend::hanging()
            .with_updates(vec![BackendStatus::new("IN_PROGRESS").with_request_id("req-42")]),
    );
    let orch = orchestrator(&backend);
    let token = CancellationToken::new();

    let pending = orch.subscribe("e", json!({}), SubscribeOptions::new(), Some(token.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();
    assert_eq!(pending.await, Err(GenerationError::Cancelled));

    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        if !backend.remote_cancels.lock().unwrap().is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "remote cancel was never issued");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(*backend.remote_cancels.lock().unwrap(), vec!["req-42".to_string()]);
}

#[tokio::test]
async fn pre_cancelled_token_never_reaches_backend() {
    let backend = Arc::new(MockBackend::succeeding(hosted_image()));
    let orch = orchestrator(&backend);
    let token = CancellationToken::new();
    token.cancel();

    let result = orch
        .subscribe("e", json!({}), SubscribeOptions::new(), Some(token))
        .await;

    assert_eq!(result, Err(GenerationError::Cancelled));
    assert_eq!(backend.calls(), 0);
    assert!(!orch.has_active());
}

#[tokio::test]
async fn cancel_all_signals_every_active_request() {
    let backend = Arc::new(MockBackend::hanging());
    let orch = orchestrator(&backend);

    let pending: Vec<_> = (0..3)
        .map(|i| orch.subscribe("e", json!({ "n": i }), SubscribeOptions::new(), None))
        .collect();
    assert_eq!(orch.registry().len(), 3);

    assert_eq!(orch.cancel_all(), 3);
    assert!(!orch.has_active());

    for p in pending {
        assert_eq!(p.await, Err(GenerationError::Cancelled));
    }
}

#[tokio::test]
async fn cancel_current_targets_latest_request() {
    let backend = Arc::new(MockBackend::hanging());
    let orch = orchestrator(&backend);

    let older = orch.subscribe(
        "e",
        json!({"n": 1}),
        SubscribeOptions::new().with_timeout_ms(300),
        None,
    );
    let newer = orch.subscribe("e", json!({"n": 2}), SubscribeOptions::new(), None);

    assert!(orch.cancel_current());
    assert_eq!(newer.await, Err(GenerationError::Cancelled));
    assert_matches!(older.await, Err(GenerationError::TimedOut { .. }));
}

// ---------------------------------------------------------------------------
// Caller-input validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_timeouts_are_rejected_before_any_call() {
    let backend = Arc::new(MockBackend::succeeding(hosted_image()));
    let orch = orchestrator(&backend);

    for timeout_ms in [0, 3_600_001] {
        let err = orch
            .subscribe(
                "e",
                json!({}),
                SubscribeOptions::new().with_timeout_ms(timeout_ms),
                None,
            )
            .await
            .unwrap_err();
        assert_matches!(err, GenerationError::InvalidRequest(_));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    assert_eq!(backend.calls(), 0);
    assert!(!orch.has_active());
}

// ---------------------------------------------------------------------------
// Status updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consecutive_duplicate_statuses_notify_once() {
    let backend = Arc::new(
        MockBackend::succeeding(hosted_image()).with_updates(vec![
            BackendStatus::new("IN_QUEUE").with_queue_position(2),
            BackendStatus::new("IN_QUEUE").with_queue_position(2),
            BackendStatus::new("IN_QUEUE").with_queue_position(1),
            BackendStatus::new("IN_PROGRESS"),
            BackendStatus::new("IN_PROGRESS"),
            BackendStatus::new("SOMETHING_NEW"),
        ]),
    );
    let orch = orchestrator(&backend);

    let seen: Arc<Mutex<Vec<JobStatus>>> = Arc::default();
    let sink = seen.clone();
    let options = SubscribeOptions::new().on_queue_update(move |s| sink.lock().unwrap().push(s.clone()));

    orch.subscribe("e", json!({}), options, None).await.unwrap();

    let seen = seen.lock().unwrap();
    let observed: Vec<_> = seen.iter().map(|s| (s.state, s.queue_position)).collect();
    // The unknown status maps to RUNNING and is therefore a duplicate.
    assert_eq!(
        observed,
        vec![
            (JobState::Queued, Some(2)),
            (JobState::Queued, Some(1)),
            (JobState::Running, None),
        ]
    );
}

#[tokio::test]
async fn subscribe_reports_progress_and_result() {
    let backend = Arc::new(MockBackend::succeeding(hosted_image()));
    let orch = orchestrator(&backend);

    let progress: Arc<Mutex<Vec<u8>>> = Arc::default();
    let results = Arc::new(AtomicUsize::new(0));
    let progress_sink = progress.clone();
    let result_count = results.clone();
    let options = SubscribeOptions::new()
        .on_progress(move |p| progress_sink.lock().unwrap().push(p))
        .on_result(move |_| {
            result_count.fetch_add(1, Ordering::SeqCst);
        });

    let result = orch.subscribe("e", json!({}), options, None).await.unwrap();

    assert_eq!(result.request_id, "req-1");
    assert_eq!(*progress.lock().unwrap(), vec![0, 100]);
    assert_eq!(results.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lifecycle_events_are_broadcast() {
    let backend = Arc::new(
        MockBackend::succeeding(hosted_image())
            .with_updates(vec![BackendStatus::new("IN_PROGRESS")]),
    );
    let orch = orchestrator(&backend);
    let mut events = orch.events();

    orch.subscribe("e", json!({}), SubscribeOptions::new(), None)
        .await
        .unwrap();

    assert_matches!(events.recv().await, Ok(OrchestratorEvent::RequestStarted { .. }));
    assert_matches!(
        events.recv().await,
        Ok(OrchestratorEvent::StatusChanged { status, .. }) if status.state == JobState::Running
    );
    assert_matches!(
        events.recv().await,
        Ok(OrchestratorEvent::RequestCompleted { request_id, .. }) if request_id == "req-1"
    );
}

// ---------------------------------------------------------------------------
// Failures and result validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backend_failures_are_categorized() {
    let backend = Arc::new(MockBackend::failing(BackendError::Status {
        status: 429,
        message: "Too many requests".into(),
    }));
    let orch = orchestrator(&backend);

    let err = orch
        .subscribe("e", json!({}), SubscribeOptions::new(), None)
        .await
        .unwrap_err();

    let info = err.info();
    assert_eq!(info.kind(), ErrorKind::RateLimit);
    assert!(info.is_retryable());
    assert_eq!(info.status_code(), Some(429));
    assert!(!orch.has_active());
}

#[tokio::test]
async fn unrecognized_failures_are_unknown() {
    let backend = Arc::new(MockBackend::failing(BackendError::Other(
        "the flux capacitor overheated".into(),
    )));
    let orch = orchestrator(&backend);

    let err = orch
        .subscribe("e", json!({}), SubscribeOptions::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn inline_base64_image_is_rejected_despite_success() {
    let backend = Arc::new(MockBackend::succeeding(json!({
        "image": {"url": "data:image/png;base64,iVBORw0KGgoAAAANSUhEUg=="}
    })));
    let orch = orchestrator(&backend);

    let err = orch
        .subscribe("e", json!({}), SubscribeOptions::new(), None)
        .await
        .unwrap_err();

    assert_matches!(&err, GenerationError::InlineMedia { field } if field == "image.url");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn safety_flag_is_a_content_policy_violation() {
    let backend = Arc::new(MockBackend::succeeding(json!({
        "images": [{"url": "https://cdn.example.com/out.png"}],
        "has_nsfw_concepts": [true],
    })));
    let orch = orchestrator(&backend);

    let err = orch
        .subscribe("e", json!({}), SubscribeOptions::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err, GenerationError::ContentPolicyViolation { flagged: 1 });
    assert_eq!(err.kind(), ErrorKind::ContentPolicy);
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_announces_nominal_progress() {
    let backend = Arc::new(MockBackend::succeeding(hosted_image()));
    let orch = orchestrator(&backend);

    let progress: Arc<Mutex<Vec<u8>>> = Arc::default();
    let sink = progress.clone();
    let result = orch
        .run(
            "e",
            json!({}),
            RunOptions::new().on_progress(move |p| sink.lock().unwrap().push(p)),
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(*progress.lock().unwrap(), vec![0, 100]);
}

#[tokio::test]
async fn run_failure_resets_progress() {
    let backend = Arc::new(MockBackend::failing(BackendError::Connection(
        "ECONNREFUSED".into(),
    )));
    let orch = orchestrator(&backend);

    let progress: Arc<Mutex<Vec<u8>>> = Arc::default();
    let sink = progress.clone();
    let err = orch
        .run(
            "e",
            json!({}),
            RunOptions::new().on_progress(move |p| sink.lock().unwrap().push(p)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(*progress.lock().unwrap(), vec![0, 0]);
}

#[tokio::test]
async fn run_honours_cancellation_token() {
    let backend = Arc::new(MockBackend::hanging());
    let orch = orchestrator(&backend);
    let token = CancellationToken::new();

    let pending = orch.run(
        "e",
        json!({}),
        RunOptions::new().with_cancellation_token(token.clone()),
    );
    token.cancel();

    assert_eq!(pending.await, Err(GenerationError::Cancelled));
    assert!(!orch.has_active());
}
