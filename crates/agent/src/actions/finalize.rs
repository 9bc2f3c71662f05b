//! Finalize: close the turn with a short localized message, no model call.

use async_trait::async_trait;
use reflexa_core::error::AgentError;
use reflexa_core::message::{Message, MessageKind, Role};
use reflexa_providers::ModelGateway;

use super::{Action, ActionOutcome};
use crate::context::{ActionContextEntry, ChatContext};
use crate::prompts;

pub const NAME: &str = "Finalize";

pub struct FinalizeAction;

#[async_trait]
impl Action for FinalizeAction {
    fn name(&self) -> &str {
        NAME
    }

    fn guidance(&self) -> &str {
        "End the turn. Choose this when the user's message needs no further answer."
    }

    async fn execute(
        &self,
        ctx: &mut ChatContext,
        _gateway: &ModelGateway,
    ) -> Result<ActionOutcome, AgentError> {
        let text = prompts::closing_message(&ctx.language);

        ctx.relay.prepare(Role::Assistant, MessageKind::Text)?;
        ctx.relay.stream(text)?;
        ctx.relay.complete()?;

        ctx.push_entry(ActionContextEntry::ReplyResponse {
            action: NAME.to_string(),
            text: text.to_string(),
        });
        ctx.push_message(Message::assistant(text));
        Ok(ActionOutcome::FINALIZE)
    }
}
