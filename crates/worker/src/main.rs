//! `genqueue-worker` -- submit one generation request and follow it.
//!
//! Submits `<payload-json>` to `<endpoint>` through the orchestrator,
//! logs every queue status change, retries retryable failures with
//! backoff, and prints the validated result as JSON on stdout. Ctrl-C
//! cancels every active request.
//!
//! ```text
//! genqueue-worker <endpoint> <payload-json> [timeout_ms]
//! ```
//!
//! # Environment variables
//!
//! | Variable                      | Required | Default                 | Description                          |
//! |-------------------------------|----------|-------------------------|--------------------------------------|
//! | `GENQUEUE_QUEUE_URL`          | no       | `https://queue.fal.run` | Queue API base URL                   |
//! | `GENQUEUE_RUN_URL`            | no       | `https://fal.run`       | Synchronous run API base URL         |
//! | `GENQUEUE_API_KEY`            | no       | --                      | Sent as `Authorization: Key <key>`   |
//! | `GENQUEUE_POLL_INTERVAL_MS`   | no       | `500`                   | Delay between status polls           |
//! | `GENQUEUE_HTTP_TIMEOUT_SECS`  | no       | `60`                    | Per-HTTP-request timeout             |
//! | `GENQUEUE_DEFAULT_TIMEOUT_MS` | no       | `300000`                | Request deadline when none is given  |
//! | `GENQUEUE_CANCEL_REMOTE`      | no       | `true`                  | Cancel remotely on timeout/cancel    |

use std::sync::Arc;

use anyhow::Context;
use genqueue_client::retry::retry_generation;
use genqueue_client::{
    ActiveRequestRegistry, HttpBackendConfig, HttpQueueBackend, Orchestrator, OrchestratorConfig,
    SubscribeOptions,
};
use genqueue_core::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: genqueue-worker <endpoint> <payload-json> [timeout_ms]";

/// Parsed command line.
struct Args {
    endpoint: String,
    payload: serde_json::Value,
    timeout_ms: Option<u64>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let endpoint = args.next().context(USAGE)?;
    let raw_payload = args.next().context(USAGE)?;
    let payload = serde_json::from_str(&raw_payload).context("payload must be valid JSON")?;
    let timeout_ms = args
        .next()
        .map(|v| v.parse::<u64>())
        .transpose()
        .context("timeout_ms must be a positive integer")?;

    Ok(Args {
        endpoint,
        payload,
        timeout_ms,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genqueue_worker=info,genqueue_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args()?;

    let backend_config = HttpBackendConfig::from_env()?;
    let orchestrator_config = OrchestratorConfig::from_env()?;

    tracing::info!(
        endpoint = %args.endpoint,
        queue_url = %backend_config.queue_url,
        timeout_ms = args.timeout_ms.unwrap_or(orchestrator_config.default_timeout_ms),
        "Starting genqueue-worker",
    );

    let backend = HttpQueueBackend::new(backend_config)?;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(backend),
        Arc::new(ActiveRequestRegistry::new()),
        orchestrator_config,
    ));

    // Ctrl-C stops the current attempt and any pending backoff.
    let shutdown = CancellationToken::new();
    {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling");
                shutdown.cancel();
                orchestrator.cancel_all();
            }
        });
    }

    let mut options = SubscribeOptions::new().on_queue_update(|status| {
        tracing::info!(
            request_id = %status.request_id,
            state = ?status.state,
            queue_position = ?status.queue_position,
            "Queue update",
        );
        for log in &status.logs {
            tracing::debug!(level = %log.level, "{}", log.message);
        }
    });
    if let Some(timeout_ms) = args.timeout_ms {
        options = options.with_timeout_ms(timeout_ms);
    }

    let outcome = retry_generation(&RetryPolicy::default(), &shutdown, |attempt| {
        tracing::debug!(attempt, "Submitting request");
        orchestrator.subscribe(
            &args.endpoint,
            args.payload.clone(),
            options.clone(),
            Some(shutdown.clone()),
        )
    })
    .await;

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            let info = e.info();
            tracing::error!(
                kind = %info.kind(),
                retryable = info.is_retryable(),
                error = %e,
                "Generation failed",
            );
            Err(e.into())
        }
    }
}
