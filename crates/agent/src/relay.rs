//! Message relay: ordered forwarding of message fragments to the client.
//!
//! Every message goes through `prepare` → `stream`/`status`* → `complete`.
//! Only one message may be open at a time. Breaking that order is a
//! programming error reported as [`AgentError::ProtocolViolation`].

use std::sync::{Arc, Mutex};

use reflexa_core::error::AgentError;
use reflexa_core::message::{MessageKind, Role};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, trace};

use crate::stream_event::SessionEvent;

/// Where session events go.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        if self.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

/// Collects events in memory, for tests and one-shot drivers.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Concatenated chunks of one message.
    pub fn content_of(&self, message_id: &str) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StreamChunk { message_id: id, content } if id == message_id => {
                    Some(content)
                }
                _ => None,
            })
            .collect()
    }

    /// `(message_id, kind)` of every prepared message, in order.
    pub fn messages(&self) -> Vec<(String, MessageKind)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PrepareMessage { message_id, kind, .. } => Some((message_id, kind)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[derive(Debug)]
struct OpenMessage {
    id: String,
    /// Coalesced fragments not yet emitted
    pending: String,
    /// Everything streamed into this message
    content: String,
}

/// Forwards one message at a time to an [`EventSink`].
pub struct MessageRelay {
    sink: Arc<dyn EventSink>,
    open: Option<OpenMessage>,
    coalesce_bytes: usize,
}

impl MessageRelay {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            open: None,
            coalesce_bytes: 0,
        }
    }

    /// Buffer fragments until at least `bytes` are pending. `0` disables coalescing.
    pub fn with_coalesce_bytes(mut self, bytes: usize) -> Self {
        self.coalesce_bytes = bytes;
        self
    }

    fn violation(message: impl Into<String>) -> AgentError {
        let message = message.into();
        error!(violation = %message, "Message relay misuse");
        AgentError::ProtocolViolation(message)
    }

    /// Open a new message and return its id.
    pub fn prepare(&mut self, role: Role, kind: MessageKind) -> Result<String, AgentError> {
        if let Some(open) = &self.open {
            return Err(Self::violation(format!(
                "prepare while message {} is still open",
                open.id
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.sink.emit(SessionEvent::PrepareMessage {
            message_id: id.clone(),
            role,
            kind,
        });
        self.open = Some(OpenMessage {
            id: id.clone(),
            pending: String::new(),
            content: String::new(),
        });
        Ok(id)
    }

    /// Forward a body fragment to the open message.
    pub fn stream(&mut self, fragment: &str) -> Result<(), AgentError> {
        let coalesce = self.coalesce_bytes;
        let Some(open) = self.open.as_mut() else {
            return Err(Self::violation("stream without an open message"));
        };
        if fragment.is_empty() {
            return Ok(());
        }

        open.content.push_str(fragment);
        if coalesce == 0 {
            self.sink.emit(SessionEvent::StreamChunk {
                message_id: open.id.clone(),
                content: fragment.to_string(),
            });
            return Ok(());
        }

        open.pending.push_str(fragment);
        if open.pending.len() >= coalesce {
            Self::flush(self.sink.as_ref(), open);
        }
        Ok(())
    }

    fn flush(sink: &dyn EventSink, open: &mut OpenMessage) {
        if open.pending.is_empty() {
            return;
        }
        sink.emit(SessionEvent::StreamChunk {
            message_id: open.id.clone(),
            content: std::mem::take(&mut open.pending),
        });
    }

    /// Attach a progress label to the open message.
    pub fn status(&mut self, label: &str) -> Result<(), AgentError> {
        let Some(open) = self.open.as_mut() else {
            return Err(Self::violation("status without an open message"));
        };
        Self::flush(self.sink.as_ref(), open);
        self.sink.emit(SessionEvent::Status {
            message_id: open.id.clone(),
            status: label.to_string(),
        });
        Ok(())
    }

    /// Close the open message. Returns everything streamed into it.
    pub fn complete(&mut self) -> Result<String, AgentError> {
        let Some(mut open) = self.open.take() else {
            return Err(Self::violation("complete without an open message"));
        };
        Self::flush(self.sink.as_ref(), &mut open);
        self.sink.emit(SessionEvent::CompleteMessage {
            message_id: open.id,
        });
        Ok(open.content)
    }

    /// Drop the open message without a completion marker.
    ///
    /// Returns whether a message was open.
    pub fn abort(&mut self) -> bool {
        match self.open.take() {
            Some(open) => {
                trace!(message_id = %open.id, "Aborted open message");
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Emit an event that does not belong to a message.
    pub fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }
}
