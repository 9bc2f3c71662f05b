//! Memory auto-save: store the latest exchange in the session's collection.

use std::sync::Arc;

use chrono::Utc;
use reflexa_core::error::AgentError;
use reflexa_core::memory::VectorStore;
use reflexa_core::message::{Conversation, MessageKind, Role};
use reflexa_providers::ModelGateway;
use tracing::debug;

use crate::context::ChatContext;

/// Embeds and upserts the last user/assistant exchange after a turn.
#[derive(Clone)]
pub struct MemoryRecorder {
    store: Arc<dyn VectorStore>,
}

impl MemoryRecorder {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Store the exchange. Returns the new point id, or `None` when the
    /// session has no memory id or no complete exchange yet.
    pub async fn record(
        &self,
        ctx: &ChatContext,
        gateway: &ModelGateway,
    ) -> Result<Option<String>, AgentError> {
        let Some(collection) = ctx.memory_id.as_deref() else {
            return Ok(None);
        };
        let Some((user, assistant)) = last_exchange(&ctx.conversation) else {
            return Ok(None);
        };

        let content = format!("User: {user}\nAssistant: {assistant}");
        let response = gateway
            .generate_embedding(&ctx.model_set, vec![content.clone()])
            .await?;

        let actual = response.embeddings.len();
        let Some(vector) = response.embeddings.into_iter().next().filter(|_| actual == 1) else {
            return Err(AgentError::EmbeddingMismatch {
                stage: "record",
                expected: 1,
                actual,
            });
        };

        let id = uuid::Uuid::new_v4().to_string();
        let payload = serde_json::json!({
            "content": content,
            "session_id": ctx.session_id,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.store.upsert(collection, &id, vector, payload).await?;

        debug!(session_id = %ctx.session_id, collection, point_id = %id, "Exchange saved to memory");
        Ok(Some(id))
    }
}

/// The last assistant answer and the user message it answered.
pub fn last_exchange(conversation: &Conversation) -> Option<(&str, &str)> {
    let messages = &conversation.messages;
    let answer_at = messages.iter().rposition(|m| {
        m.role == Role::Assistant && matches!(m.kind, MessageKind::Text | MessageKind::Question)
    })?;
    let question = messages[..answer_at]
        .iter()
        .rev()
        .find(|m| m.role == Role::User)?;
    Some((question.content.as_str(), messages[answer_at].content.as_str()))
}
