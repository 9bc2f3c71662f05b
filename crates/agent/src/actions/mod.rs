//! Actions the decision loop can choose from, and the registry holding them.
//!
//! An action is stateless apart from injected collaborators (a vector store,
//! an event bus). It reads and extends the [`ChatContext`], talks to models
//! through the [`ModelGateway`] and streams its output through the relay.
//! Whether the turn ends is decided by the returned [`ActionOutcome`].

pub mod finalize;
pub mod memory_search;
pub mod question;
pub mod reply;

pub use finalize::FinalizeAction;
pub use memory_search::MemorySearchAction;
pub use question::QuestionAction;
pub use reply::ReplyAction;

use std::sync::Arc;

use async_trait::async_trait;
use reflexa_core::error::AgentError;
use reflexa_core::memory::VectorStore;
use reflexa_core::model::ModelPurpose;
use reflexa_providers::{GatewayResponse, InvokeOptions, ModelGateway};

use crate::context::{ActionContextEntry, ChatContext, IterationLlmRequest};
use crate::prompts;
use crate::protocol::BodyJsonParser;

/// What an action tells the loop when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionOutcome {
    /// End the turn after this action
    pub finalize: bool,
}

impl ActionOutcome {
    pub const FINALIZE: Self = Self { finalize: true };
    pub const CONTINUE: Self = Self { finalize: false };
}

/// A unit of work the decision loop can dispatch to.
#[async_trait]
pub trait Action: Send + Sync {
    /// Name the model uses to pick this action.
    fn name(&self) -> &str;

    /// One or two sentences telling the model when to pick it.
    fn guidance(&self) -> &str;

    /// Whether the action can run in this turn. Unavailable actions are
    /// neither offered to the model nor resolved from its answer.
    fn is_available(&self, _ctx: &ChatContext) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &mut ChatContext,
        gateway: &ModelGateway,
    ) -> Result<ActionOutcome, AgentError>;
}

/// Immutable name → action table, in registration order.
#[derive(Clone)]
pub struct ActionRegistry {
    actions: Vec<Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Build a registry. Names must be unique, ignoring case.
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Result<Self, AgentError> {
        for (i, action) in actions.iter().enumerate() {
            let duplicate = actions[..i]
                .iter()
                .any(|a| a.name().eq_ignore_ascii_case(action.name()));
            if duplicate {
                return Err(AgentError::DuplicateAction(action.name().to_string()));
            }
        }
        Ok(Self { actions })
    }

    /// Reply, MemorySearch, Question and Finalize.
    pub fn standard(store: Option<Arc<dyn VectorStore>>) -> Self {
        Self::with_memory_search(MemorySearchAction::new(store))
    }

    /// The standard set with a preconfigured memory search.
    pub fn with_memory_search(memory_search: MemorySearchAction) -> Self {
        Self {
            actions: vec![
                Arc::new(ReplyAction),
                Arc::new(memory_search),
                Arc::new(QuestionAction),
                Arc::new(FinalizeAction),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.iter().find(|a| a.name() == name).cloned()
    }

    pub fn find_ignore_case(&self, name: &str) -> Option<Arc<dyn Action>> {
        let name = name.trim();
        self.actions
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// The actions that can run against `ctx`, in registration order.
    pub fn available(&self, ctx: &ChatContext) -> Self {
        Self {
            actions: self
                .actions
                .iter()
                .filter(|a| a.is_available(ctx))
                .cloned()
                .collect(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Action>> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

/// A streamed model call whose answer follows the body/JSON protocol.
///
/// The caller opens a relay message first; body text is forwarded into it
/// while the answer streams.
pub(crate) struct ProtocolCall {
    pub purpose: ModelPurpose,
    pub prompt_type: &'static str,
    pub system_prompt: String,
    pub replayed: Vec<ActionContextEntry>,
    pub options: InvokeOptions,
}

pub(crate) struct ProtocolAnswer {
    pub parser: BodyJsonParser,
    pub response: GatewayResponse,
    /// Unsealed; the caller seals it with the parsed entry
    pub record: IterationLlmRequest,
}

impl ProtocolCall {
    pub(crate) async fn run(
        self,
        ctx: &mut ChatContext,
        gateway: &ModelGateway,
    ) -> Result<ProtocolAnswer, AgentError> {
        let model_set = Arc::clone(&ctx.model_set);
        let resolved = gateway.resolve_model_spec(&model_set, self.purpose)?;
        let messages = prompts::with_history(self.system_prompt.clone(), &ctx.conversation);
        let record = IterationLlmRequest::begin(
            self.purpose,
            self.prompt_type,
            Some(resolved.spec),
            self.system_prompt,
            self.replayed,
        );

        let mut parser = BodyJsonParser::new();
        let relay = &mut ctx.relay;
        let response = gateway
            .invoke_streaming(
                &model_set,
                self.purpose,
                messages,
                |fragment| match parser.push(fragment) {
                    Some(body) => relay.stream(&body),
                    None => Ok(()),
                },
                &self.options,
            )
            .await?;

        Ok(ProtocolAnswer {
            parser,
            response,
            record,
        })
    }
}
