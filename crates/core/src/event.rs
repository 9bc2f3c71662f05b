//! Domain event system — decoupled observation of the agent loop.
//!
//! Events are published when a model is called, an action finishes, memory
//! is searched or something fails. Subscribers (logging, metrics, tests)
//! react without the loop knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The gateway completed a model call
    ModelInvoked {
        purpose: String,
        provider: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// An action handler returned
    ActionExecuted {
        session_id: String,
        action: String,
        success: bool,
        finalize: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The retrieval chain finished a search pass
    MemorySearched {
        collection: String,
        groups: usize,
        hits: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error was reported to the client
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
