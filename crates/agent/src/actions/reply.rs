//! Reply: answer the user directly.

use async_trait::async_trait;
use reflexa_core::error::AgentError;
use reflexa_core::message::{Message, MessageKind, Role};
use reflexa_core::model::ModelPurpose;
use reflexa_providers::{InvokeOptions, ModelGateway};
use serde::Deserialize;
use tracing::debug;

use super::{Action, ActionOutcome, ProtocolCall};
use crate::context::{ActionContextEntry, ChatContext, EntryFilter};
use crate::prompts;

pub const NAME: &str = "Reply";

/// Payload of reply-style answers.
#[derive(Debug, Deserialize)]
pub(crate) struct PlainTextPayload {
    pub plain_text: String,
}

/// Streams a `chat` answer to the user and ends the turn.
pub struct ReplyAction;

#[async_trait]
impl Action for ReplyAction {
    fn name(&self) -> &str {
        NAME
    }

    fn guidance(&self) -> &str {
        "Answer the user directly. Choose this once you know enough to give a useful answer."
    }

    async fn execute(
        &self,
        ctx: &mut ChatContext,
        gateway: &ModelGateway,
    ) -> Result<ActionOutcome, AgentError> {
        let memories = EntryFilter::MEMORY.render(ctx.entries());
        let system_prompt = prompts::reply_system(&ctx.language, &memories);
        respond(ctx, gateway, NAME, MessageKind::Text, "reply", system_prompt).await
    }
}

/// Shared by Reply and Question: stream a `chat` answer into a new message,
/// record it and push it into the history.
pub(crate) async fn respond(
    ctx: &mut ChatContext,
    gateway: &ModelGateway,
    action: &str,
    kind: MessageKind,
    prompt_type: &'static str,
    system_prompt: String,
) -> Result<ActionOutcome, AgentError> {
    ctx.relay.prepare(Role::Assistant, kind)?;

    let answer = ProtocolCall {
        purpose: ModelPurpose::Chat,
        prompt_type,
        system_prompt,
        replayed: EntryFilter::MEMORY.select(ctx.entries()),
        options: InvokeOptions::default(),
    }
    .run(ctx, gateway)
    .await?;

    let payload: PlainTextPayload = answer.parser.end_as()?;
    let body = answer.parser.body().trim();
    let text = if body.is_empty() {
        // Some models put everything in the payload
        ctx.relay.stream(&payload.plain_text)?;
        payload.plain_text.trim().to_string()
    } else {
        body.to_string()
    };
    ctx.relay.complete()?;

    debug!(session_id = %ctx.session_id, action, chars = text.len(), "Reply streamed");

    let entry = ActionContextEntry::ReplyResponse {
        action: action.to_string(),
        text: text.clone(),
    };
    ctx.record_request(answer.record.seal(&answer.response, Some(entry.clone())));
    ctx.push_entry(entry);
    ctx.push_message(Message::assistant(text).with_kind(kind));

    Ok(ActionOutcome::FINALIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::{ScriptedProvider, context, gateway};
    use crate::context::MemorySearchGroup;
    use crate::stream_event::SessionEvent;

    #[tokio::test]
    async fn streams_body_and_records_reply() {
        let provider = ScriptedProvider::new(&[
            "Rust is a systems language.\n<<END-OF-BODY>>\n{\"plain_text\":\"Rust is a systems language.\"}",
        ]);
        let gateway = gateway(provider.clone());
        let (mut ctx, sink) = context("What is Rust?");

        let outcome = ReplyAction.execute(&mut ctx, &gateway).await.unwrap();
        assert_eq!(outcome, ActionOutcome::FINALIZE);

        let (id, kind) = sink.messages()[0].clone();
        assert_eq!(kind, MessageKind::Text);
        assert_eq!(sink.content_of(&id), "Rust is a systems language.");
        assert!(matches!(sink.events().last(), Some(SessionEvent::CompleteMessage { .. })));

        assert_eq!(
            ctx.entries(),
            [ActionContextEntry::ReplyResponse {
                action: "Reply".into(),
                text: "Rust is a systems language.".into(),
            }]
        );
        assert_eq!(ctx.conversation.messages.last().unwrap().content, "Rust is a systems language.");
        assert_eq!(ctx.llm_requests().len(), 1);
        assert_eq!(ctx.llm_requests()[0].prompt_type, "reply");
        assert_eq!(ctx.llm_requests()[0].model.as_ref().unwrap().model, "chat-1");
    }

    #[tokio::test]
    async fn memory_results_reach_the_prompt() {
        let provider = ScriptedProvider::new(&["Dark mode.\n<<END-OF-BODY>>\n{\"plain_text\":\"Dark mode.\"}"]);
        let gateway = gateway(provider.clone());
        let (mut ctx, _) = context("Which theme do I like?");
        let mut group = MemorySearchGroup::new("preferences", "theme");
        group.content = Some("prefers dark mode".into());
        ctx.push_entry(ActionContextEntry::MemorySearchResult { groups: vec![group] });

        ReplyAction.execute(&mut ctx, &gateway).await.unwrap();
        assert!(provider.system_prompt(0).contains("prefers dark mode"));
        assert_eq!(ctx.llm_requests()[0].replayed.len(), 1);
    }

    #[tokio::test]
    async fn empty_body_falls_back_to_payload_text() {
        let provider = ScriptedProvider::new(&["<<END-OF-BODY>>\n{\"plain_text\":\"Hi there\"}"]);
        let gateway = gateway(provider);
        let (mut ctx, sink) = context("hello");

        ReplyAction.execute(&mut ctx, &gateway).await.unwrap();
        let (id, _) = sink.messages()[0].clone();
        assert_eq!(sink.content_of(&id), "Hi there");
        assert_eq!(ctx.conversation.messages.last().unwrap().content, "Hi there");
    }

    #[tokio::test]
    async fn missing_sentinel_fails_without_entry() {
        let provider = ScriptedProvider::new(&["I forgot the format"]);
        let gateway = gateway(provider);
        let (mut ctx, _) = context("hello");

        let err = ReplyAction.execute(&mut ctx, &gateway).await.unwrap_err();
        assert_eq!(err.code(), "parse");
        assert!(ctx.entries().is_empty());
        assert!(ctx.llm_requests().is_empty());
        assert!(ctx.relay.is_open());
    }
}
