//! MemorySearch: look up the session's long-term memories.
//!
//! The retrieval chain runs in three stages over parallel lists that must
//! stay index-aligned:
//!
//! 1. **plan**: a streamed `reasoning` call returns keyword groups
//! 2. **embed**: one batched embedding call over every group's keywords
//! 3. **search**: top-1 vector search per embedded group
//!
//! A count mismatch between groups and embeddings (or search results) is a
//! fatal [`AgentError::EmbeddingMismatch`]; nothing is truncated and no group
//! is left half-populated.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::future::BoxFuture;
use reflexa_core::error::{AgentError, MemoryError};
use reflexa_core::event::{DomainEvent, EventBus};
use reflexa_core::memory::{VectorMatch, VectorStore};
use reflexa_core::message::{MessageKind, Role};
use reflexa_core::model::ModelPurpose;
use reflexa_providers::{InvokeOptions, ModelGateway};
use serde::Deserialize;
use tracing::{debug, info};

use super::{Action, ActionOutcome, ProtocolCall};
use crate::context::{ActionContextEntry, ChatContext, EntryFilter, MemorySearchGroup};
use crate::prompts;

pub const NAME: &str = "MemorySearch";

/// Planner payload: `{"searchGroups": [{"purpose": "...", "keywords": "..."}]}`.
#[derive(Debug, Deserialize)]
struct MemoryPlan {
    #[serde(rename = "searchGroups", default)]
    search_groups: Vec<PlannedGroup>,
}

#[derive(Debug, Deserialize)]
struct PlannedGroup {
    #[serde(default)]
    purpose: String,
    keywords: Keywords,
}

/// Models write keywords either as one string or as a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Keywords {
    Text(String),
    List(Vec<String>),
}

impl Keywords {
    fn joined(self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::List(words) => words.join(" ").trim().to_string(),
        }
    }
}

pub struct MemorySearchAction {
    store: Option<Arc<dyn VectorStore>>,
    concurrency: usize,
    events: Option<Arc<EventBus>>,
}

impl MemorySearchAction {
    pub fn new(store: Option<Arc<dyn VectorStore>>) -> Self {
        Self {
            store,
            concurrency: 1,
            events: None,
        }
    }

    /// Run up to `n` searches at once. Results keep group order.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }
}

#[async_trait]
impl Action for MemorySearchAction {
    fn name(&self) -> &str {
        NAME
    }

    fn guidance(&self) -> &str {
        "Search the user's long-term memories for facts, preferences or past events. \
         Choose this before answering when personal context could matter and it has \
         not been searched yet this turn."
    }

    fn is_available(&self, ctx: &ChatContext) -> bool {
        self.store.is_some() && ctx.memory_id.is_some()
    }

    async fn execute(
        &self,
        ctx: &mut ChatContext,
        gateway: &ModelGateway,
    ) -> Result<ActionOutcome, AgentError> {
        let Some(collection) = ctx.memory_id.clone() else {
            return Err(AgentError::MemoryNotFound(ctx.session_id.clone()));
        };
        let Some(store) = self.store.clone() else {
            return Err(AgentError::MemoryNotFound(collection));
        };

        ctx.relay.prepare(Role::Assistant, MessageKind::MemorySearch)?;

        // Plan
        let context = EntryFilter::MEMORY.render(ctx.entries());
        let answer = ProtocolCall {
            purpose: ModelPurpose::Reasoning,
            prompt_type: "memory_plan",
            system_prompt: prompts::memory_plan_system(&ctx.language, &context),
            replayed: EntryFilter::MEMORY.select(ctx.entries()),
            options: InvokeOptions::default(),
        }
        .run(ctx, gateway)
        .await?;

        let plan: MemoryPlan = answer.parser.end_as()?;
        let mut groups: Vec<MemorySearchGroup> = plan
            .search_groups
            .into_iter()
            .map(|g| MemorySearchGroup::new(g.purpose, g.keywords.joined()))
            .filter(|g| !g.keywords.is_empty())
            .collect();
        ctx.record_request(answer.record.seal(
            &answer.response,
            Some(ActionContextEntry::MemorySearchResponse {
                groups: groups.clone(),
            }),
        ));

        if groups.is_empty() {
            debug!(session_id = %ctx.session_id, "Nothing worth searching");
        } else {
            // Embed
            ctx.relay.status("embedding")?;
            let texts = groups.iter().map(|g| g.keywords.clone()).collect();
            let response = gateway.generate_embedding(&ctx.model_set, texts).await?;
            assign_embeddings(&mut groups, response.embeddings)?;

            // Search
            ctx.relay.status("searching")?;
            search_groups(store.as_ref(), &collection, &mut groups, self.concurrency).await?;
        }

        ctx.relay.complete()?;

        let hits = groups.iter().filter(|g| g.content.is_some()).count();
        info!(
            session_id = %ctx.session_id,
            collection = %collection,
            groups = groups.len(),
            hits,
            "Memory search finished"
        );
        if let Some(events) = &self.events {
            events.publish(DomainEvent::MemorySearched {
                collection,
                groups: groups.len(),
                hits,
                timestamp: Utc::now(),
            });
        }

        ctx.push_entry(ActionContextEntry::MemorySearchResult { groups });
        Ok(ActionOutcome::CONTINUE)
    }
}

/// Attach embeddings to groups by index, only if the counts match.
pub fn assign_embeddings(
    groups: &mut [MemorySearchGroup],
    embeddings: Vec<Vec<f32>>,
) -> Result<(), AgentError> {
    if embeddings.len() != groups.len() {
        return Err(AgentError::EmbeddingMismatch {
            stage: "embed",
            expected: groups.len(),
            actual: embeddings.len(),
        });
    }

    for (group, embedding) in groups.iter_mut().zip(embeddings) {
        group.embedding = Some(embedding);
    }
    Ok(())
}

/// Top-1 search for every group that has an embedding.
///
/// Groups without an embedding are skipped. A group with no match keeps
/// empty match fields.
pub async fn search_groups(
    store: &dyn VectorStore,
    collection: &str,
    groups: &mut [MemorySearchGroup],
    concurrency: usize,
) -> Result<(), AgentError> {
    let queries: Vec<(usize, Vec<f32>)> = groups
        .iter()
        .enumerate()
        .filter_map(|(i, g)| g.embedding.clone().map(|v| (i, v)))
        .collect();
    let indices: Vec<usize> = queries.iter().map(|(i, _)| *i).collect();

    // Futures are created up front so the stream owns plain boxed futures.
    let searches: Vec<BoxFuture<'_, Result<Vec<VectorMatch>, MemoryError>>> = queries
        .iter()
        .map(|(_, vector)| store.search(collection, vector, 1))
        .collect();

    let results: Vec<_> = futures::stream::iter(searches)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    if results.len() != indices.len() {
        return Err(AgentError::EmbeddingMismatch {
            stage: "search",
            expected: indices.len(),
            actual: results.len(),
        });
    }

    for (index, result) in indices.into_iter().zip(results) {
        let Some(best) = result?.into_iter().next() else {
            continue;
        };
        let group = &mut groups[index];
        group.content = best
            .content()
            .map(str::to_string)
            .or_else(|| (!best.payload.is_null()).then(|| best.payload.to_string()));
        group.score = Some(best.score);
        group.vector_id = Some(best.id);
    }
    Ok(())
}
