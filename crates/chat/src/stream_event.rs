//! Chat-level streaming events.
//!
//! `ChatStreamEvent` wraps provider-level stream chunks into higher-level
//! events that the gateway forwards to clients over SSE:
//!
//! - `delta` — partial reply text
//! - `done`  — stream complete, full reply attached
//! - `error` — the stream degraded to a failure-category reply

use lorebook_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the orchestrator during streaming execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// Partial reply text.
    Delta { content: String },

    /// The stream is complete — final metadata.
    Done {
        conversation_id: String,
        response: String,
        usage: Option<Usage>,
    },

    /// The cycle failed; `message` is the user-visible category reply.
    Error { message: String },
}

impl ChatStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
