//! HTTP API v1: streamed runs and introspection.
//!
//! Endpoints:
//!
//! - `POST /v1/runs/stream`  Start a run, get an SSE stream of its events
//! - `GET  /v1/tools`        List the tool catalog offered to the model
//! - `GET  /v1/events`       SSE stream of domain events across all runs

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::info;

use quarry_core::event::{DomainEvent, EventBus};
use quarry_core::message::Message;
use quarry_core::tool::{Credentials, ToolService};
use quarry_orchestrator::{Orchestrator, RunRequest};

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub orchestrator: Orchestrator,
    pub tools: Arc<dyn ToolService>,
    pub event_bus: Arc<EventBus>,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/runs/stream", post(run_stream_handler))
        .route("/tools", get(list_tools_handler))
        .route("/events", get(event_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub message: String,
    /// Prior turns of the conversation, oldest first
    #[serde(default)]
    pub history: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolInfo>,
    pub count: usize,
}

// ── Runs ──────────────────────────────────────────────────────────────────

/// Caller credentials, passed through to the tool service untouched.
fn credentials_from(headers: &HeaderMap) -> Credentials {
    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => Credentials::new().with("authorization", value),
        None => Credentials::new(),
    }
}

/// `POST /v1/runs/stream`: start a run, receive its events over SSE.
///
/// Each event is named by its type (`content`, `tool_started`,
/// `tool_finished`, `error`, `done`). Closing the connection cancels the run.
async fn run_stream_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Json(payload): Json<RunBody>,
) -> Result<
    Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    if payload.message.len() > MAX_MESSAGE_BYTES {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorResponse {
                error: format!("message exceeds {MAX_MESSAGE_BYTES} bytes"),
            }),
        ));
    }

    let credentials = credentials_from(&headers);
    info!(
        message_len = payload.message.len(),
        history_turns = payload.history.len(),
        has_credentials = !credentials.is_empty(),
        "v1/runs/stream SSE request"
    );

    let request = RunRequest::new(payload.message)
        .with_history(payload.history)
        .with_credentials(credentials);
    let rx = state.orchestrator.run_stream(request);

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream))
}

const MAX_MESSAGE_BYTES: usize = 64 * 1024;

// ── Tools ─────────────────────────────────────────────────────────────────

async fn list_tools_handler(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolInfo> = state
        .tools
        .definitions()
        .into_iter()
        .map(|d| ToolInfo {
            name: d.name,
            description: d.description,
            parameters: d.parameters,
        })
        .collect();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

// ── Domain event stream ───────────────────────────────────────────────────

fn domain_event_name(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::RunStarted { .. } => "run_started",
        DomainEvent::ResponseGenerated { .. } => "response_generated",
        DomainEvent::ToolExecuted { .. } => "tool_executed",
        DomainEvent::DuplicateToolCall { .. } => "duplicate_tool_call",
        DomainEvent::BudgetExhausted { .. } => "budget_exhausted",
        DomainEvent::RunFailed { .. } => "run_failed",
    }
}

/// `GET /v1/events`: SSE stream of domain events (runs, tool calls, failures).
async fn event_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default()
                .event(domain_event_name(event.as_ref()))
                .data(data))
        });

    Sse::new(stream)
}
