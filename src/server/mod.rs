//! HTTP surface for starting, streaming, inspecting, and cancelling runs.

pub mod registry;

pub use registry::{RunRegistry, spawn_run};

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::workflow::node::describe;
use crate::workflow::{ChannelSink, RunContext, RunState, WorkflowEngine};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<RunRegistry>,
}

/// Build the router. The webhook route exists only when `webhook` is set.
pub fn routes(state: AppState, webhook: bool) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/graph", get(graph))
        .route("/invoke", post(invoke))
        .route("/stream", post(stream))
        .route("/status", get(latest_status))
        .route("/runs/{id}", get(run_status))
        .route("/runs/{id}/cancel", post(cancel_run));
    if webhook {
        router = router.route("/webhook/inbox", post(inbox_webhook));
    }
    router.layer(CorsLayer::permissive()).with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct InvokeRequest {
    #[serde(default)]
    input: Option<RunState>,
}

/// Seed state from an optional JSON body; an empty body means defaults.
fn parse_seed(body: &Bytes) -> Result<RunState, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunState::default());
    }
    serde_json::from_slice::<InvokeRequest>(body)
        .map(|r| r.input.unwrap_or_default())
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))
}

// ── Health & graph ──────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-triage"
    }))
}

async fn graph() -> impl IntoResponse {
    Json(describe())
}

// ── Runs ────────────────────────────────────────────────────────────

async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    let seed = match parse_seed(&body) {
        Ok(seed) => seed,
        Err(resp) => return resp,
    };
    let ctx = RunContext::new();
    state.registry.register(ctx.clone()).await;
    info!(run_id = %ctx.id(), queued = seed.queue.len(), "Invoke request");

    match state.engine.run_with(seed, &ctx).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(run_id = %ctx.id(), error = %e, "Run failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "error": e.to_string(),
                    "run_id": ctx.id(),
                })),
            )
                .into_response()
        }
    }
}

async fn stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let seed = parse_seed(&body)?;

    let ctx = RunContext::new();
    let run_id = ctx.id();
    // Register before attaching the sink so the registry's clone does not
    // keep the event channel open after the run ends.
    state.registry.register(ctx.clone()).await;
    let (sink, rx) = ChannelSink::new();
    let ctx = ctx.with_sink(Arc::new(sink));
    info!(run_id = %run_id, "Stream request");

    let engine = state.engine.clone();
    let run = tokio::spawn(async move { engine.run_with(seed, &ctx).await });

    let node_events = UnboundedReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().event("node").data(data))
    });

    let started = futures::stream::once(async move {
        let data = serde_json::json!({ "run_id": run_id, "status": "running" });
        Ok::<_, Infallible>(Event::default().event("run_started").data(data.to_string()))
    });

    let finished = futures::stream::once(async move {
        let event = match run.await {
            Ok(Ok(report)) => Event::default()
                .event("report")
                .data(serde_json::to_string(&report).unwrap_or_default()),
            Ok(Err(e)) => Event::default()
                .event("error")
                .data(serde_json::json!({ "error": e.to_string(), "run_id": run_id }).to_string()),
            Err(e) => Event::default()
                .event("error")
                .data(serde_json::json!({ "error": format!("run task failed: {e}"), "run_id": run_id }).to_string()),
        };
        Ok::<_, Infallible>(event)
    });

    Ok(Sse::new(started.chain(node_events).chain(finished)).keep_alive(KeepAlive::default()))
}

async fn latest_status(State(state): State<AppState>) -> Response {
    match state.registry.latest().await {
        Some(ctx) => Json(ctx.status().await).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no runs yet"),
    }
}

async fn run_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.registry.get(id).await {
        Some(ctx) => Json(ctx.status().await).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown run {id}")),
    }
}

async fn cancel_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    if state.registry.cancel(id).await {
        info!(run_id = %id, "Cancellation requested");
        Json(serde_json::json!({ "run_id": id, "cancelled": true })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("unknown run {id}"))
    }
}

// ── Webhook ─────────────────────────────────────────────────────────

/// Mailbox push notification. The payload only signals new mail; the run
/// fetches from the inbox source itself.
async fn inbox_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    info!(bytes = body.len(), "Inbox webhook received");
    let run_id = spawn_run(state.engine.clone(), state.registry.clone(), RunState::default()).await;
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted", "run_id": run_id })),
    )
        .into_response()
}
