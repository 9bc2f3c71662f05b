//! Chat title generation on the first turn.

use reflexa_core::error::AgentError;
use reflexa_core::message::Message;
use reflexa_core::model::ModelPurpose;
use reflexa_providers::{InvokeOptions, ModelGateway};
use tracing::debug;

use crate::context::{ChatContext, IterationLlmRequest};
use crate::prompts;
use crate::stream_event::SessionEvent;

const MAX_TITLE_CHARS: usize = 80;

/// Ask the `fastChat` model for a title and emit it as a `stream_title` event.
///
/// Returns `None` when the model produced nothing usable.
pub async fn generate_title(
    ctx: &mut ChatContext,
    gateway: &ModelGateway,
) -> Result<Option<String>, AgentError> {
    let Some(first) = ctx.conversation.last_user_message().map(|m| m.content.clone()) else {
        return Ok(None);
    };

    let system_prompt = prompts::title_system(&ctx.language);
    let resolved = gateway.resolve_model_spec(&ctx.model_set, ModelPurpose::FastChat)?;
    let record = IterationLlmRequest::begin(
        ModelPurpose::FastChat,
        "title",
        Some(resolved.spec),
        system_prompt.clone(),
        Vec::new(),
    );

    let response = gateway
        .invoke(
            &ctx.model_set,
            ModelPurpose::FastChat,
            vec![Message::system(system_prompt), Message::user(first)],
            &InvokeOptions::default().with_temperature(0.3).with_max_tokens(24),
        )
        .await?;

    let title = clean_title(&response.content);
    ctx.record_request(record.seal(&response, None));

    if let Some(title) = &title {
        debug!(session_id = %ctx.session_id, title = %title, "Generated title");
        ctx.conversation.title = Some(title.clone());
        ctx.emit(SessionEvent::StreamTitle {
            title: title.clone(),
        });
    }
    Ok(title)
}

/// First non-empty line without quotes, a `Title:` prefix or a trailing period.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .strip_prefix("Title:")
        .or_else(|| line.strip_prefix("title:"))
        .unwrap_or(line)
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '*' | '#' | '`'))
        .trim_end_matches('.')
        .trim();

    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_TITLE_CHARS).collect())
}
