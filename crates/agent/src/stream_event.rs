//! Session-level streaming events.
//!
//! `SessionEvent` is what the transport forwards to the client: message
//! lifecycle (prepare, chunks, status, complete), the chat title, errors and
//! the end-of-turn summary.

use reflexa_core::message::{MessageKind, Role};
use reflexa_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted to the client while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new message is about to stream.
    PrepareMessage {
        message_id: String,
        role: Role,
        kind: MessageKind,
    },

    /// Body text for an open message.
    StreamChunk { message_id: String, content: String },

    /// A progress label for an open message (e.g. `embedding`).
    Status { message_id: String, status: String },

    /// The message is complete.
    CompleteMessage { message_id: String },

    /// Generated chat title.
    StreamTitle { title: String },

    /// The turn failed.
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },

    /// The turn finished, normally or by hitting the iteration limit.
    Completed {
        session_id: String,
        iterations: usize,
        usage: Usage,
        forced: bool,
    },
}

impl SessionEvent {
    /// Event name, for transports that label frames (SSE `event:` lines).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PrepareMessage { .. } => "prepare_message",
            Self::StreamChunk { .. } => "stream_chunk",
            Self::Status { .. } => "status",
            Self::CompleteMessage { .. } => "complete_message",
            Self::StreamTitle { .. } => "stream_title",
            Self::Error { .. } => "error",
            Self::Completed { .. } => "completed",
        }
    }

    /// The message this event belongs to, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::PrepareMessage { message_id, .. }
            | Self::StreamChunk { message_id, .. }
            | Self::Status { message_id, .. }
            | Self::CompleteMessage { message_id } => Some(message_id),
            Self::StreamTitle { .. } | Self::Error { .. } | Self::Completed { .. } => None,
        }
    }
}
