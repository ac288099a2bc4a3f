//! HTTP/SSE Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;

use agent_core::card::AgentCard;
use agent_core::error::{AgentError, ErrorPayload};
use agent_core::protocol::{InvocationRequest, InvocationResponse, StreamEvent, TASK_ID_HEADER};

use crate::runner;
use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub model: String,
    pub model_reachable: bool,
    pub skills: usize,
    pub tasks: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub task_id: String,
    pub status: &'static str,
}

pub type ApiError = (StatusCode, Json<ErrorPayload>);

fn reject(error: &AgentError) -> ApiError {
    let status = match error {
        AgentError::InvalidAction(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(kind = error.kind(), error = %error, "Invocation refused");
    (status, Json(error.payload()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let model = state.agent.model();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: model.provider_name().to_string(),
        model: model.model().to_string(),
        model_reachable: model.health_check().await,
        skills: state.registry.snapshot().skills.len(),
        tasks: state.tasks.len(),
    })
}

/// Current agent card
pub async fn agent_card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.registry.snapshot().as_ref().clone())
}

/// Streamed invocation; the task id travels in a response header
pub async fn stream_task(
    State(state): State<AppState>,
    Json(request): Json<InvocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = runner::start(&state, request).map_err(|e| reject(&e))?;

    let correlation_id = handle.correlation_id;
    let events = ReceiverStream::new(handle.events)
        .map(move |message| Event::default().json_data(StreamEvent::from_message(&correlation_id, message)));

    Ok((
        [(TASK_ID_HEADER, handle.task_id)],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

/// Non-streaming invocation; answers once the task has finished
pub async fn invoke_task(
    State(state): State<AppState>,
    Json(request): Json<InvocationRequest>,
) -> Result<Json<InvocationResponse>, ApiError> {
    let mut handle = runner::start(&state, request).map_err(|e| reject(&e))?;

    let mut messages = Vec::new();
    let mut error = None;
    while let Some(message) = handle.events.recv().await {
        match message.error() {
            Some(payload) => error = Some(payload.clone()),
            None => messages.push(message),
        }
    }

    Ok(Json(InvocationResponse {
        correlation_id: handle.correlation_id,
        task_id: handle.task_id,
        context_id: handle.context_id,
        messages,
        error,
    }))
}

/// Cancel an in-flight task
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    if !state.tasks.cancel(&task_id) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorPayload::new("UnknownTask", format!("no running task '{task_id}'"))),
        ));
    }

    tracing::info!(task = %task_id, "Cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            task_id,
            status: "cancelling",
        }),
    ))
}
