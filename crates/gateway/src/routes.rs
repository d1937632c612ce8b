//! The v1 REST API.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`                        — one chat cycle, JSON reply
//! - `POST /v1/chat/stream`                 — one chat cycle, SSE events
//! - `GET  /v1/conversations/{id}/history`  — audit view of a conversation

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use lorebook_core::message::{ConversationId, Message};

use crate::SharedState;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/conversations/{id}/history", get(history_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    /// Existing conversation ID (omit to start a new conversation).
    #[serde(default)]
    conversation_id: Option<String>,
    /// The user's query.
    query: String,
}

#[derive(Serialize)]
struct ChatResponse {
    conversation_id: String,
    response: String,
}

#[derive(Serialize)]
struct HistoryResponse {
    conversation_id: String,
    /// "transcript" when served from the persisted log, "context" when
    /// served from the in-memory (trimmed) store.
    source: &'static str,
    messages: Vec<MessageDto>,
}

#[derive(Serialize)]
struct MessageDto {
    role: lorebook_core::message::Role,
    content: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<Message> for MessageDto {
    fn from(m: Message) -> Self {
        Self {
            role: m.role,
            content: m.content,
            timestamp: m.timestamp,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message.into() }),
    )
}

fn internal_error(message: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message.to_string() }),
    )
}

fn conversation_id_from(request_id: Option<String>) -> ConversationId {
    match request_id {
        Some(id) if !id.trim().is_empty() => ConversationId::from(&id),
        _ => ConversationId::new(),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/chat` — run one chat cycle and return the reply.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let conversation_id = conversation_id_from(payload.conversation_id);
    info!(conversation = %conversation_id, "v1/chat request");

    let response = state
        .orchestrator
        .handle(&conversation_id, &payload.query)
        .await
        .map_err(|e| {
            error!(conversation = %conversation_id, error = %e, "Chat cycle failed");
            internal_error(e)
        })?;

    Ok(Json(ChatResponse {
        conversation_id: conversation_id.to_string(),
        response,
    }))
}

/// `POST /v1/chat/stream` — run one chat cycle, streaming SSE events.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let conversation_id = conversation_id_from(payload.conversation_id);
    info!(conversation = %conversation_id, "v1/chat/stream request");

    let rx = state
        .orchestrator
        .handle_stream(&conversation_id, &payload.query)
        .await
        .map_err(|e| {
            error!(conversation = %conversation_id, error = %e, "Chat stream failed to start");
            internal_error(e)
        })?;

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream))
}

/// `GET /v1/conversations/{id}/history` — the conversation's history.
///
/// Served from the unbounded transcript when one is configured and holds the
/// conversation; otherwise from the in-memory (trimmed) context store.
async fn history_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let conversation_id = ConversationId::from(&id);

    if let Some(transcript) = state.orchestrator.transcript() {
        let messages = transcript
            .messages(&conversation_id)
            .await
            .map_err(internal_error)?;
        if !messages.is_empty() {
            return Ok(Json(HistoryResponse {
                conversation_id: conversation_id.to_string(),
                source: "transcript",
                messages: messages.into_iter().map(Into::into).collect(),
            }));
        }
    }

    let messages = state
        .orchestrator
        .store()
        .history(&conversation_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(HistoryResponse {
        conversation_id: conversation_id.to_string(),
        source: "context",
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}
