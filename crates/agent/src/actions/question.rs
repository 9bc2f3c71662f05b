//! Question: ask the user for missing information.

use async_trait::async_trait;
use reflexa_core::error::AgentError;
use reflexa_core::message::MessageKind;
use reflexa_providers::ModelGateway;

use super::reply::respond;
use super::{Action, ActionOutcome};
use crate::context::{ChatContext, EntryFilter};
use crate::prompts;

pub const NAME: &str = "Question";

pub struct QuestionAction;

#[async_trait]
impl Action for QuestionAction {
    fn name(&self) -> &str {
        NAME
    }

    fn guidance(&self) -> &str {
        "Ask the user one clarifying question. Choose this when the request is ambiguous \
         or needs information only the user can give."
    }

    async fn execute(
        &self,
        ctx: &mut ChatContext,
        gateway: &ModelGateway,
    ) -> Result<ActionOutcome, AgentError> {
        let memories = EntryFilter::MEMORY.render(ctx.entries());
        let system_prompt = prompts::question_system(&ctx.language, &memories);
        respond(ctx, gateway, NAME, MessageKind::Question, "question", system_prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::{ScriptedProvider, context, gateway};
    use crate::context::ActionContextEntry;

    #[tokio::test]
    async fn question_is_streamed_as_question_kind() {
        let provider = ScriptedProvider::new(&[
            "Which city do you mean?\n<<END-OF-BODY>>\n{\"plain_text\":\"Which city do you mean?\"}",
        ]);
        let gateway = gateway(provider.clone());
        let (mut ctx, sink) = context("What's the weather there?");

        let outcome = QuestionAction.execute(&mut ctx, &gateway).await.unwrap();
        assert!(outcome.finalize);
        assert_eq!(sink.messages()[0].1, MessageKind::Question);
        assert_eq!(ctx.conversation.messages.last().unwrap().kind, MessageKind::Question);
        assert!(matches!(
            &ctx.entries()[0],
            ActionContextEntry::ReplyResponse { action, .. } if action == "Question"
        ));
        assert!(provider.system_prompt(0).contains("clarifying question"));
    }
}
