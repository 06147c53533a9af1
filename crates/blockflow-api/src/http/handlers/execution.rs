//! Execution handlers: start, inspect, cancel, and follow runs.

use std::convert::Infallible;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use blockflow_types::event::{TraceEvent, TraceEventKind};
use blockflow_types::execution::RunSummary;
use blockflow_types::graph::WorkflowGraph;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/executions`.
#[derive(Debug, Deserialize)]
pub struct StartExecutionRequest {
    pub graph: WorkflowGraph,
    /// Initial input bag; defaults to an empty object.
    #[serde(default = "empty_object")]
    pub input: Value,
}

fn empty_object() -> Value {
    json!({})
}

fn parse_execution_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid execution id '{raw}'")))
}

/// POST /api/v1/executions - Validate a graph and start running it.
pub async fn start_execution(
    State(state): State<AppState>,
    Json(body): Json<StartExecutionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AppError> {
    let start = Instant::now();
    let handle = state.engine.start_execution(body.graph, body.input)?;
    let id = handle.execution_id();
    tracing::info!(execution_id = %id, "execution started via API");

    let resp = ApiResponse::success(json!({ "execution_id": id }), start)
        .with_link("self", &format!("/api/v1/executions/{id}"))
        .with_link("events", &format!("/api/v1/executions/{id}/events"))
        .with_link("cancel", &format!("/api/v1/executions/{id}/cancel"));

    Ok((StatusCode::ACCEPTED, Json(resp)))
}

/// GET /api/v1/executions/{id} - Current summary of a live or retained run.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RunSummary>>, AppError> {
    let start = Instant::now();
    let id = parse_execution_id(&id)?;
    let summary = state.engine.summary(id)?;
    Ok(Json(
        ApiResponse::success(summary, start)
            .with_link("self", &format!("/api/v1/executions/{id}")),
    ))
}

/// POST /api/v1/executions/{id}/cancel - Request cancellation of a live run.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let id = parse_execution_id(&id)?;
    state.engine.cancel_execution(id)?;
    Ok(Json(ApiResponse::success(
        json!({ "execution_id": id, "cancelled": true }),
        start,
    )))
}

/// GET /api/v1/executions/{id}/events - Server-Sent Events trace stream.
///
/// Replays already-published events, follows live ones, and closes after
/// the `run_finished` event.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let id = parse_execution_id(&id)?;
    let events = state.engine.subscribe(id)?;
    Ok(Sse::new(events.map(|event| Ok(to_sse(&event)))).keep_alive(KeepAlive::default()))
}

/// SSE event name for a trace event.
pub fn event_name(kind: &TraceEventKind) -> &'static str {
    match kind {
        TraceEventKind::RunStarted { .. } => "run_started",
        TraceEventKind::Block { .. } => "block",
        TraceEventKind::Recovery { .. } => "recovery",
        TraceEventKind::BlockFinished { .. } => "block_finished",
        TraceEventKind::RunFinished { .. } => "run_finished",
    }
}

fn to_sse(event: &TraceEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::warn!(error = %e, seq = event.seq, "failed to serialize trace event");
        "{}".to_string()
    });
    Event::default()
        .event(event_name(&event.kind))
        .id(event.seq.to_string())
        .data(data)
}
