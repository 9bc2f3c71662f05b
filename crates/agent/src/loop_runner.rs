//! The decision/reflection loop.
//!
//! Each iteration asks the `reasoning` model which registered action to run
//! next, streams its reasoning to the client, resolves the answer to exactly
//! one action and executes it. The turn ends when an action finalizes, when
//! the iteration limit is reached (a forced finalize), on the first error, or
//! when the session's cancellation token fires.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reflexa_config::AgentSettings;
use reflexa_core::error::AgentError;
use reflexa_core::event::{DomainEvent, EventBus};
use reflexa_core::message::{MessageKind, Role};
use reflexa_core::model::ModelPurpose;
use reflexa_core::provider::Usage;
use reflexa_providers::{InvokeOptions, ModelGateway};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{Action, ActionOutcome, ActionRegistry, ProtocolCall, finalize};
use crate::context::{ActionContextEntry, ChatContext, EntryFilter};
use crate::prompts;
use crate::recorder::MemoryRecorder;
use crate::stream_event::SessionEvent;
use crate::title;

/// Decision payload: `{"action": "<name>"}`.
#[derive(Debug, Deserialize)]
struct DecisionPayload {
    action: String,
}

/// How the chosen action was found in the model's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The payload named a registered action
    Exact,
    /// A registered name appeared in the raw text
    Substring,
    /// Nothing matched; fell back to Finalize
    Default,
}

/// A completed decision.
pub struct Decision {
    pub action: Arc<dyn Action>,
    pub resolution: Resolution,
    pub reasoning: String,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Finalized,
    /// The iteration limit was reached
    ForcedFinalize,
    Failed { code: &'static str },
    Cancelled,
}

/// Summary of one turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub iterations: usize,
    pub outcome: TurnOutcome,
    /// Tokens used by every model call of the turn
    pub usage: Usage,
    /// Executed actions, in order
    pub actions: Vec<String>,
}

/// Pick the action named by a decision.
///
/// First match wins: the parsed `action` field (ignoring case), then the
/// earliest registered name found in the raw text (longer name on ties),
/// then Finalize. Without a registered Finalize, nothing matching is
/// `ActionNotFound`.
pub fn resolve_action(
    registry: &ActionRegistry,
    parsed: Option<&str>,
    raw: &str,
) -> Result<(Arc<dyn Action>, Resolution), AgentError> {
    if let Some(action) = parsed.and_then(|name| registry.find_ignore_case(name)) {
        return Ok((action, Resolution::Exact));
    }

    let haystack = raw.to_lowercase();
    let mut best: Option<(usize, usize, &Arc<dyn Action>)> = None;
    for action in registry.iter() {
        let needle = action.name().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if let Some(at) = haystack.find(&needle) {
            let better = match best {
                None => true,
                Some((best_at, best_len, _)) => {
                    at < best_at || (at == best_at && needle.len() > best_len)
                }
            };
            if better {
                best = Some((at, needle.len(), action));
            }
        }
    }
    if let Some((_, _, action)) = best {
        return Ok((Arc::clone(action), Resolution::Substring));
    }

    registry
        .get(finalize::NAME)
        .map(|action| (action, Resolution::Default))
        .ok_or_else(|| {
            AgentError::ActionNotFound(parsed.unwrap_or("(none)").to_string())
        })
}

/// Runs turns against a shared gateway and action registry.
pub struct AgentLoop {
    gateway: Arc<ModelGateway>,
    registry: Arc<ActionRegistry>,
    events: Option<Arc<EventBus>>,
    max_iterations: usize,
    decision_temperature: f32,
    decision_max_tokens: u32,
    generate_title: bool,
    recorder: Option<MemoryRecorder>,
}

impl AgentLoop {
    pub fn new(gateway: Arc<ModelGateway>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            gateway,
            registry,
            events: None,
            max_iterations: 8,
            decision_temperature: 0.1,
            decision_max_tokens: 512,
            generate_title: false,
            recorder: None,
        }
    }

    /// Apply the `[agent]` config section.
    pub fn with_settings(mut self, settings: &AgentSettings) -> Self {
        self.max_iterations = settings.max_iterations;
        self.decision_temperature = settings.decision_temperature;
        self.decision_max_tokens = settings.decision_max_tokens;
        self.generate_title = settings.generate_title;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_decision_options(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.decision_temperature = temperature;
        self.decision_max_tokens = max_tokens;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_title_generation(mut self, enabled: bool) -> Self {
        self.generate_title = enabled;
        self
    }

    /// Save each finalized exchange to the session's memory collection.
    pub fn with_recorder(mut self, recorder: MemoryRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Ask the model for the next action.
    pub async fn decide(&self, ctx: &mut ChatContext) -> Result<Decision, AgentError> {
        let context = EntryFilter::DECISION.render(ctx.entries());
        let available = self.registry.available(ctx);
        ctx.relay.prepare(Role::Assistant, MessageKind::Reasoning)?;

        let answer = ProtocolCall {
            purpose: ModelPurpose::Reasoning,
            prompt_type: "decision",
            system_prompt: prompts::decision_system(&ctx.language, &available, &context),
            replayed: EntryFilter::DECISION.select(ctx.entries()),
            options: InvokeOptions::default()
                .with_temperature(self.decision_temperature)
                .with_max_tokens(self.decision_max_tokens),
        }
        .run(ctx, &self.gateway)
        .await?;
        ctx.relay.complete()?;

        let parsed = match answer.parser.end_as::<DecisionPayload>() {
            Ok(payload) => Some(payload.action),
            Err(e) => {
                debug!(session_id = %ctx.session_id, error = %e, "Decision payload unusable, scanning raw text");
                None
            }
        };
        let (action, resolution) =
            resolve_action(&available, parsed.as_deref(), &answer.response.content)?;

        let reasoning = answer.parser.body().trim().to_string();
        let entry = ActionContextEntry::ReflectionResponse {
            action: action.name().to_string(),
            reasoning: reasoning.clone(),
        };
        ctx.record_request(answer.record.seal(&answer.response, Some(entry.clone())));
        ctx.push_entry(entry);

        info!(
            session_id = %ctx.session_id,
            action = action.name(),
            resolution = ?resolution,
            "Action selected"
        );
        Ok(Decision {
            action,
            resolution,
            reasoning,
        })
    }

    async fn execute(
        &self,
        ctx: &mut ChatContext,
        action: &Arc<dyn Action>,
    ) -> Result<ActionOutcome, AgentError> {
        let started = Instant::now();
        let result = action.execute(ctx, &self.gateway).await;

        self.publish(DomainEvent::ActionExecuted {
            session_id: ctx.session_id.clone(),
            action: action.name().to_string(),
            success: result.is_ok(),
            finalize: result.as_ref().is_ok_and(|o| o.finalize),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        result
    }

    async fn iterate(
        &self,
        ctx: &mut ChatContext,
        iteration: usize,
    ) -> Result<(String, ActionOutcome), AgentError> {
        let decision = self.decide(ctx).await?;
        let name = decision.action.name().to_string();
        debug!(session_id = %ctx.session_id, iteration, action = %name, "Executing action");

        let outcome = self.execute(ctx, &decision.action).await?;
        Ok((name, outcome))
    }

    /// Close the turn after the iteration limit, with Finalize when registered.
    async fn force_finalize(
        &self,
        ctx: &mut ChatContext,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        warn!(
            session_id = %ctx.session_id,
            max_iterations = self.max_iterations,
            "Iteration limit reached, forcing finalize"
        );

        let Some(action) = self.registry.get(finalize::NAME) else {
            return TurnOutcome::ForcedFinalize;
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = self.execute(ctx, &action) => result,
        };
        match result {
            Ok(_) => TurnOutcome::ForcedFinalize,
            Err(e) => self.fail(ctx, e),
        }
    }

    /// Abort the open message and report the error (cancellation is silent).
    fn fail(&self, ctx: &mut ChatContext, err: AgentError) -> TurnOutcome {
        ctx.relay.abort();

        if let AgentError::Cancelled = err {
            info!(session_id = %ctx.session_id, "Turn cancelled");
            return TurnOutcome::Cancelled;
        }

        let code = err.code();
        if let AgentError::ProtocolViolation(_) = err {
            error!(session_id = %ctx.session_id, error = %err, "Turn aborted");
        } else {
            warn!(session_id = %ctx.session_id, code, error = %err, retryable = err.is_retryable(), "Turn failed");
        }

        let cause = std::error::Error::source(&err).map(|s| s.to_string());
        ctx.send_error(code, &err.to_string(), cause);
        self.publish(DomainEvent::ErrorOccurred {
            context: format!("session {}", ctx.session_id),
            error_message: err.to_string(),
            timestamp: Utc::now(),
        });
        TurnOutcome::Failed { code }
    }

    /// Run one user turn to completion.
    ///
    /// Never returns an error: failures are reported to the client through
    /// the context and summarized in the report.
    pub async fn run_turn(&self, ctx: &mut ChatContext) -> TurnReport {
        let first_request = ctx.llm_requests().len();
        let cancel = ctx.cancel_token().clone();
        info!(
            session_id = %ctx.session_id,
            model_set = %ctx.model_set.name,
            actions = self.registry.len(),
            "Turn started"
        );

        if self.generate_title && ctx.user_turns() == 1 && ctx.conversation.title.is_none() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Ok(None),
                result = title::generate_title(ctx, &self.gateway) => result,
            };
            if let Err(e) = result {
                warn!(session_id = %ctx.session_id, error = %e, "Title generation failed");
            }
        }

        let mut iterations = 0;
        let mut actions = Vec::new();
        let outcome = loop {
            if iterations >= self.max_iterations {
                break self.force_finalize(ctx, &cancel).await;
            }
            iterations += 1;

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                step = self.iterate(ctx, iterations) => step,
            };
            match step {
                Ok((name, outcome)) => {
                    actions.push(name);
                    if outcome.finalize {
                        break TurnOutcome::Finalized;
                    }
                }
                Err(e) => break self.fail(ctx, e),
            }
        };

        let usage = ctx.llm_requests()[first_request..]
            .iter()
            .fold(Usage::default(), |mut total, r| {
                total.add(&r.usage);
                total
            });

        if matches!(outcome, TurnOutcome::Finalized | TurnOutcome::ForcedFinalize) {
            ctx.emit(SessionEvent::Completed {
                session_id: ctx.session_id.clone(),
                iterations,
                usage,
                forced: outcome == TurnOutcome::ForcedFinalize,
            });
        }

        // A Finalize closing line is not an answer worth remembering
        let answered = actions.last().is_some_and(|name| name != finalize::NAME);
        if let (TurnOutcome::Finalized, true, Some(recorder)) = (&outcome, answered, &self.recorder) {
            match recorder.record(ctx, &self.gateway).await {
                Ok(Some(id)) => debug!(session_id = %ctx.session_id, point_id = %id, "Auto-saved exchange"),
                Ok(None) => {}
                Err(e) => warn!(session_id = %ctx.session_id, error = %e, "Memory auto-save failed"),
            }
        }

        info!(
            session_id = %ctx.session_id,
            iterations,
            outcome = ?outcome,
            tokens = usage.total_tokens,
            "Turn finished"
        );
        TurnReport {
            iterations,
            outcome,
            usage,
            actions,
        }
    }
}
