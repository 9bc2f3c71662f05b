//! Per-session state shared by the decision loop and the actions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reflexa_core::message::{Conversation, Message, Role};
use reflexa_core::model::{ModelPurpose, ModelSetConfig, ModelSpec};
use reflexa_core::provider::Usage;
use reflexa_providers::GatewayResponse;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::relay::{EventSink, MessageRelay};
use crate::stream_event::SessionEvent;

/// One keyword group of a memory lookup.
///
/// Planning fills `purpose` and `keywords`, embedding fills `embedding`,
/// search fills the match fields (or leaves them empty when nothing matched).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchGroup {
    pub purpose: String,
    pub keywords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl MemorySearchGroup {
    pub fn new(purpose: impl Into<String>, keywords: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            keywords: keywords.into(),
            embedding: None,
            vector_id: None,
            content: None,
            score: None,
        }
    }
}

/// Durable record of what happened during a turn, replayed into prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionContextEntry {
    /// The decision loop picked an action.
    ReflectionResponse { action: String, reasoning: String },

    /// The memory lookup plan.
    MemorySearchResponse { groups: Vec<MemorySearchGroup> },

    /// The memory lookup results.
    MemorySearchResult { groups: Vec<MemorySearchGroup> },

    /// Text sent to the user by Reply, Question or Finalize.
    ReplyResponse { action: String, text: String },
}

/// Discriminant of [`ActionContextEntry`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    ReflectionResponse,
    MemorySearchResponse,
    MemorySearchResult,
    ReplyResponse,
}

impl ActionContextEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::ReflectionResponse { .. } => EntryKind::ReflectionResponse,
            Self::MemorySearchResponse { .. } => EntryKind::MemorySearchResponse,
            Self::MemorySearchResult { .. } => EntryKind::MemorySearchResult,
            Self::ReplyResponse { .. } => EntryKind::ReplyResponse,
        }
    }

    /// Prompt rendering of the entry.
    pub fn render(&self) -> String {
        match self {
            Self::ReflectionResponse { action, reasoning } => {
                if reasoning.is_empty() {
                    format!("- Chose {action}.")
                } else {
                    format!("- Chose {action}: {reasoning}")
                }
            }
            Self::MemorySearchResponse { groups } => {
                let planned: Vec<String> = groups
                    .iter()
                    .map(|g| format!("{} ({})", g.purpose, g.keywords))
                    .collect();
                format!("- Planned memory lookups: {}", planned.join("; "))
            }
            Self::MemorySearchResult { groups } => {
                if groups.is_empty() {
                    return "- Memory lookup: nothing to search for.".to_string();
                }
                let mut out = String::from("- Memory lookup results:");
                for g in groups {
                    match &g.content {
                        Some(content) => {
                            out.push_str(&format!("\n  * {} [{}]: {content}", g.purpose, g.keywords))
                        }
                        None => out.push_str(&format!(
                            "\n  * {} [{}]: nothing found",
                            g.purpose, g.keywords
                        )),
                    }
                }
                out
            }
            Self::ReplyResponse { action, text } => format!("- {action} sent: {text}"),
        }
    }
}

/// Which entries a prompt replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFilter(&'static [EntryKind]);

impl EntryFilter {
    pub const ALL: Self = Self(&[
        EntryKind::ReflectionResponse,
        EntryKind::MemorySearchResponse,
        EntryKind::MemorySearchResult,
        EntryKind::ReplyResponse,
    ]);

    /// What the decision prompt needs: past choices and what memory returned.
    pub const DECISION: Self = Self(&[EntryKind::ReflectionResponse, EntryKind::MemorySearchResult]);

    /// Reply-style prompts only need recalled memories.
    pub const MEMORY: Self = Self(&[EntryKind::MemorySearchResult]);

    pub const fn only(kinds: &'static [EntryKind]) -> Self {
        Self(kinds)
    }

    pub fn accepts(&self, kind: EntryKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn select(&self, entries: &[ActionContextEntry]) -> Vec<ActionContextEntry> {
        entries
            .iter()
            .filter(|e| self.accepts(e.kind()))
            .cloned()
            .collect()
    }

    /// Render the accepted entries, one block per entry. Empty when none match.
    pub fn render(&self, entries: &[ActionContextEntry]) -> String {
        entries
            .iter()
            .filter(|e| self.accepts(e.kind()))
            .map(ActionContextEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Record of one model call made during an iteration.
///
/// Created with [`begin`](Self::begin) before the call and sealed with
/// [`seal`](Self::seal) once the response has been parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationLlmRequest {
    pub id: Uuid,
    pub purpose: ModelPurpose,
    /// `decision`, `reply`, `question`, `memory_plan`, `title`, ...
    pub prompt_type: String,
    pub model: Option<ModelSpec>,
    pub system_prompt: String,
    /// Entries replayed into the prompt, in order
    pub replayed: Vec<ActionContextEntry>,
    pub response: String,
    pub parsed: Option<ActionContextEntry>,
    pub usage: Usage,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IterationLlmRequest {
    pub fn begin(
        purpose: ModelPurpose,
        prompt_type: impl Into<String>,
        model: Option<ModelSpec>,
        system_prompt: impl Into<String>,
        replayed: Vec<ActionContextEntry>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            purpose,
            prompt_type: prompt_type.into(),
            model,
            system_prompt: system_prompt.into(),
            replayed,
            response: String::new(),
            parsed: None,
            usage: Usage::default(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn seal(mut self, response: &GatewayResponse, parsed: Option<ActionContextEntry>) -> Self {
        self.response = response.content.clone();
        self.usage = response.usage;
        self.parsed = parsed;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Everything an action may read or change while it runs.
pub struct ChatContext {
    pub session_id: String,
    pub conversation: Conversation,
    pub model_set: Arc<ModelSetConfig>,
    /// Collection holding this session's memories
    pub memory_id: Option<String>,
    pub language: String,
    pub relay: MessageRelay,
    entries: Vec<ActionContextEntry>,
    llm_requests: Vec<IterationLlmRequest>,
    cancel: CancellationToken,
}

impl ChatContext {
    pub fn new(
        conversation: Conversation,
        model_set: Arc<ModelSetConfig>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            session_id: conversation.id.to_string(),
            conversation,
            model_set,
            memory_id: None,
            language: "en".into(),
            relay: MessageRelay::new(sink),
            entries: Vec::new(),
            llm_requests: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_coalesce_bytes(mut self, bytes: usize) -> Self {
        self.relay = self.relay.with_coalesce_bytes(bytes);
        self
    }

    pub fn entries(&self) -> &[ActionContextEntry] {
        &self.entries
    }

    pub fn push_entry(&mut self, entry: ActionContextEntry) {
        debug!(session_id = %self.session_id, kind = ?entry.kind(), "Context entry appended");
        self.entries.push(entry);
    }

    pub fn llm_requests(&self) -> &[IterationLlmRequest] {
        &self.llm_requests
    }

    /// Keep a sealed request record. Unsealed records are dropped.
    pub fn record_request(&mut self, request: IterationLlmRequest) {
        if !request.is_sealed() {
            warn!(request_id = %request.id, "Discarding unsealed request record");
            return;
        }
        self.llm_requests.push(request);
    }

    pub fn push_message(&mut self, message: Message) {
        self.conversation.push(message);
    }

    /// Number of user messages so far.
    pub fn user_turns(&self) -> usize {
        self.conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report a failed turn to the client.
    pub fn send_error(&self, code: &str, message: &str, cause: Option<String>) {
        self.relay.emit(SessionEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
            cause,
        });
    }

    pub fn emit(&self, event: SessionEvent) {
        self.relay.emit(event);
    }
}

impl std::fmt::Debug for ChatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatContext")
            .field("session_id", &self.session_id)
            .field("messages", &self.conversation.messages.len())
            .field("model_set", &self.model_set.name)
            .field("memory_id", &self.memory_id)
            .field("language", &self.language)
            .field("entries", &self.entries.len())
            .field("llm_requests", &self.llm_requests.len())
            .finish()
    }
}
