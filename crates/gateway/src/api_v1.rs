//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat/stream`  Send a message, receive an SSE record stream
//! - `GET  /v1/tools`        List the tools offered to the model
//! - `GET  /v1/usage`        Telemetry snapshot

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
};
use fundwise_core::error::SessionError;
use fundwise_core::message::SessionRequest;
use fundwise_telemetry::UsageSnapshot;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::SharedState;

/// Final SSE payload, after the last record.
pub const STREAM_SENTINEL: &str = "[DONE]";

pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream_handler))
        .route("/tools", get(list_tools_handler))
        .route("/usage", get(usage_handler))
        .with_state(state)
}

// ── Types ─────────────────────────────────────────────────────────────────

/// Body of a pre-stream failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl ErrorResponse {
    fn from_session(error: &SessionError) -> (StatusCode, Json<Self>) {
        let status = error.status_class().http_status();
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            Json(Self {
                error: error.to_string(),
                status,
            }),
        )
    }
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

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// `POST /v1/chat/stream`: run a session and stream its records.
///
/// Each record is one `data:` line of JSON; the stream closes with
/// `data: [DONE]`. Failures before the first record return a JSON
/// [`ErrorResponse`] with the mapped status code instead.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<SessionRequest>,
) -> Result<
    Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    info!(
        history = payload.history.len(),
        attachments = payload.attachments.len(),
        "v1/chat/stream request"
    );

    let handle = state.orchestrator.start(payload).await.map_err(|e| {
        warn!(error = %e, "Chat stream rejected");
        ErrorResponse::from_session(&e)
    })?;

    let records = ReceiverStream::new(handle.records).map(|record| {
        let data = serde_json::to_string(&record).unwrap_or_default();
        Ok(SseEvent::default().data(data))
    });
    let stream = records.chain(tokio_stream::once(Ok(
        SseEvent::default().data(STREAM_SENTINEL)
    )));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Tools & usage ─────────────────────────────────────────────────────────

/// `GET /v1/tools`
async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolInfo> = state
        .orchestrator
        .tool_definitions()
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

/// `GET /v1/usage`
async fn usage_handler(State(state): State<SharedState>) -> Json<UsageSnapshot> {
    Json(state.orchestrator.telemetry().engine().snapshot())
}
