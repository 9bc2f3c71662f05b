//! Model gateway — purpose-based model resolution and invocation.
//!
//! Callers never name a model. They name a [`ModelPurpose`] and pass the
//! session's [`ModelSetConfig`]; the gateway resolves the purpose (walking
//! its fallback chain), routes to the provider registered for the model spec's
//! provider id, and normalizes the result. There are no retries here:
//! failures carry a typed [`ProviderError`] whose `is_retryable()` lets the
//! caller decide.

use std::sync::Arc;

use chrono::Utc;
use reflexa_core::error::{AgentError, ProviderError};
use reflexa_core::event::{DomainEvent, EventBus};
use reflexa_core::message::Message;
use reflexa_core::model::{ModelPurpose, ModelSetConfig, ModelSpec};
use reflexa_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, Usage, default_temperature,
};
use tracing::{debug, info, warn};

use crate::registry::ProviderRegistry;

/// The outcome of resolving a purpose against a model set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    /// What the caller asked for
    pub requested: ModelPurpose,
    /// The purpose whose spec was used (differs on fallback)
    pub matched: ModelPurpose,
    pub spec: ModelSpec,
}

impl ResolvedModel {
    pub fn is_fallback(&self) -> bool {
        self.requested != self.matched
    }
}

/// Per-call overrides. Unset fields fall back to the model spec, then to defaults.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

impl InvokeOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Normalized result of a chat invocation.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub content: String,
    pub usage: Usage,
    /// Model that answered, as reported by the provider
    pub model: String,
    pub provider: String,
    pub purpose: ModelPurpose,
}

/// Uniform invoke / streaming-invoke / embed over the registered providers.
pub struct ModelGateway {
    registry: ProviderRegistry,
    events: Option<Arc<EventBus>>,
}

impl ModelGateway {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    /// Publish a `ModelInvoked` event after each successful call.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolve a purpose: exact match first, then the purpose's fallback chain.
    pub fn resolve_model_spec(
        &self,
        model_set: &ModelSetConfig,
        purpose: ModelPurpose,
    ) -> Result<ResolvedModel, AgentError> {
        let mut tried = Vec::new();

        for candidate in std::iter::once(purpose).chain(purpose.fallback_chain().iter().copied()) {
            tried.push(candidate.as_str().to_string());
            if let Some(spec) = model_set.get(candidate) {
                if candidate != purpose {
                    debug!(
                        requested = %purpose,
                        matched = %candidate,
                        model_set = %model_set.name,
                        "Purpose resolved through fallback"
                    );
                }
                return Ok(ResolvedModel {
                    requested: purpose,
                    matched: candidate,
                    spec: spec.clone(),
                });
            }
        }

        Err(AgentError::ModelResolution {
            purpose: purpose.as_str().to_string(),
            tried,
        })
    }

    fn provider_for(&self, spec: &ModelSpec) -> Result<Arc<dyn Provider>, AgentError> {
        self.registry
            .get(&spec.provider)
            .ok_or_else(|| AgentError::UnknownProvider {
                provider: spec.provider.clone(),
            })
    }

    fn build_request(
        resolved: &ResolvedModel,
        messages: Vec<Message>,
        options: &InvokeOptions,
        stream: bool,
    ) -> ProviderRequest {
        ProviderRequest {
            model: resolved.spec.model.clone(),
            messages,
            temperature: options
                .temperature
                .or(resolved.spec.temperature)
                .unwrap_or_else(default_temperature),
            max_tokens: options.max_tokens.or(resolved.spec.max_tokens),
            stream,
            stop: options.stop.clone(),
        }
    }

    fn publish(&self, response: &GatewayResponse) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ModelInvoked {
                purpose: response.purpose.as_str().to_string(),
                provider: response.provider.clone(),
                model: response.model.clone(),
                tokens_used: response.usage.total_tokens,
                timestamp: Utc::now(),
            });
        }
    }

    /// Single-shot chat invocation.
    pub async fn invoke(
        &self,
        model_set: &ModelSetConfig,
        purpose: ModelPurpose,
        messages: Vec<Message>,
        options: &InvokeOptions,
    ) -> Result<GatewayResponse, AgentError> {
        let resolved = self.resolve_model_spec(model_set, purpose)?;
        let provider = self.provider_for(&resolved.spec)?;
        let request = Self::build_request(&resolved, messages, options, false);

        debug!(purpose = %purpose, provider = %resolved.spec.provider, model = %request.model, "Invoking model");

        let response = provider.complete(request).await.map_err(|e| {
            warn!(purpose = %purpose, provider = %resolved.spec.provider, error = %e, "Model invocation failed");
            AgentError::ProviderInvocation(e)
        })?;

        let result = GatewayResponse {
            content: response.message.content,
            usage: response.usage.unwrap_or_default(),
            model: response.model,
            provider: resolved.spec.provider,
            purpose,
        };
        self.publish(&result);
        Ok(result)
    }

    /// Streaming chat invocation.
    ///
    /// Every non-empty fragment is handed to `on_chunk` in receipt order. An
    /// error from `on_chunk` stops consumption and is returned as-is. The
    /// returned response carries the concatenated content and the summed usage.
    pub async fn invoke_streaming<F>(
        &self,
        model_set: &ModelSetConfig,
        purpose: ModelPurpose,
        messages: Vec<Message>,
        mut on_chunk: F,
        options: &InvokeOptions,
    ) -> Result<GatewayResponse, AgentError>
    where
        F: FnMut(&str) -> Result<(), AgentError> + Send,
    {
        let resolved = self.resolve_model_spec(model_set, purpose)?;
        let provider = self.provider_for(&resolved.spec)?;
        let request = Self::build_request(&resolved, messages, options, true);
        let model = request.model.clone();

        debug!(purpose = %purpose, provider = %resolved.spec.provider, model = %model, "Streaming model");

        let mut rx = provider
            .stream(request)
            .await
            .map_err(AgentError::ProviderInvocation)?;

        let mut content = String::new();
        let mut usage = Usage::default();

        while let Some(item) = rx.recv().await {
            let chunk = item.map_err(|e| {
                warn!(purpose = %purpose, error = %e, "Stream failed mid-response");
                AgentError::ProviderInvocation(e)
            })?;

            if let Some(text) = chunk.content.as_deref().filter(|t| !t.is_empty()) {
                on_chunk(text)?;
                content.push_str(text);
            }

            if let Some(u) = &chunk.usage {
                usage.add(u);
            }

            if chunk.done {
                break;
            }
        }

        let result = GatewayResponse {
            content,
            usage,
            model,
            provider: resolved.spec.provider,
            purpose,
        };
        self.publish(&result);
        Ok(result)
    }

    /// Embed a batch of texts with the model set's `embedding` model.
    pub async fn generate_embedding(
        &self,
        model_set: &ModelSetConfig,
        texts: Vec<String>,
    ) -> Result<EmbeddingResponse, AgentError> {
        let resolved = self.resolve_model_spec(model_set, ModelPurpose::Embedding)?;
        let provider = self.provider_for(&resolved.spec)?;
        let count = texts.len();

        let response = provider
            .embed(EmbeddingRequest {
                model: resolved.spec.model.clone(),
                inputs: texts,
            })
            .await
            .map_err(AgentError::ProviderInvocation)?;

        info!(
            provider = %resolved.spec.provider,
            model = %resolved.spec.model,
            inputs = count,
            vectors = response.embeddings.len(),
            "Generated embeddings"
        );

        Ok(response)
    }

    /// Check every registered provider.
    pub async fn health(&self) -> Vec<(String, Result<bool, ProviderError>)> {
        let mut out = Vec::new();
        for id in self.registry.ids() {
            if let Some(provider) = self.registry.get(id) {
                out.push((id.to_string(), provider.health_check().await));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reflexa_core::provider::{ChunkReceiver, ProviderResponse, StreamChunk};
    use std::sync::Mutex;

    /// Streams scripted chunks and records every request it receives.
    struct ScriptedProvider {
        chunks: Vec<Result<StreamChunk, ProviderError>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(chunks: Vec<Result<StreamChunk, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn text(parts: &[&str]) -> Arc<Self> {
            let mut chunks: Vec<_> = parts
                .iter()
                .map(|p| Ok(StreamChunk { content: Some(p.to_string()), done: false, usage: None }))
                .collect();
            chunks.push(Ok(StreamChunk {
                content: None,
                done: true,
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 4, total_tokens: 14 }),
            }));
            Self::new(chunks)
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let model = request.model.clone();
            self.requests.lock().unwrap().push(request);
            let text: String = self
                .chunks
                .iter()
                .filter_map(|c| c.as_ref().ok().and_then(|c| c.content.clone()))
                .collect();
            Ok(ProviderResponse { message: Message::assistant(text), usage: None, model })
        }

        async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let (tx, rx) = tokio::sync::mpsc::channel(self.chunks.len().max(1));
            for chunk in &self.chunks {
                tx.send(chunk.clone()).await.unwrap();
            }
            Ok(rx)
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            Ok(EmbeddingResponse {
                embeddings: request.inputs.iter().map(|t| vec![t.len() as f32, 1.0]).collect(),
                model: request.model,
                usage: None,
            })
        }
    }

    fn gateway_with(id: &str, provider: Arc<ScriptedProvider>) -> ModelGateway {
        ModelGateway::new(ProviderRegistry::new().with(id, provider))
    }

    #[test]
    fn empty_model_set_fails_resolution_listing_chain() {
        let gateway = ModelGateway::new(ProviderRegistry::new());
        let err = gateway
            .resolve_model_spec(&ModelSetConfig::new("empty"), ModelPurpose::ReasoningHeavy)
            .unwrap_err();
        match err {
            AgentError::ModelResolution { purpose, tried } => {
                assert_eq!(purpose, "reasoningHeavy");
                assert_eq!(tried, vec!["reasoningHeavy", "reasoning", "chat"]);
            }
            other => panic!("expected ModelResolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolvable_purpose_never_calls_a_provider() {
        let provider = ScriptedProvider::text(&["never"]);
        let gateway = gateway_with("mock", provider.clone());
        let err = gateway
            .invoke_streaming(
                &ModelSetConfig::new("empty"),
                ModelPurpose::ReasoningHeavy,
                vec![Message::user("hi")],
                |_| Ok(()),
                &InvokeOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "model_resolution");
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn codegen_falls_back_to_reasoning() {
        let gateway = ModelGateway::new(ProviderRegistry::new());
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Reasoning, ModelSpec::new("mock", "think-1"))
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));
        let resolved = gateway.resolve_model_spec(&set, ModelPurpose::Codegen).unwrap();
        assert_eq!(resolved.matched, ModelPurpose::Reasoning);
        assert!(resolved.is_fallback());
        assert_eq!(resolved.spec.model, "think-1");

        let exact = gateway.resolve_model_spec(&set, ModelPurpose::Chat).unwrap();
        assert!(!exact.is_fallback());
    }

    #[tokio::test]
    async fn unknown_provider_is_a_configuration_error() {
        let gateway = ModelGateway::new(ProviderRegistry::new());
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Chat, ModelSpec::new("ghost", "m"));
        let err = gateway
            .invoke(&set, ModelPurpose::Chat, vec![], &InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownProvider { ref provider } if provider == "ghost"));
        assert_eq!(err.code(), "configuration");
    }

    #[tokio::test]
    async fn streaming_delivers_chunks_in_order_and_aggregates() {
        let provider = ScriptedProvider::text(&["Hel", "lo, ", "world"]);
        let gateway = gateway_with("mock", provider.clone());
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));

        let mut seen = Vec::new();
        let response = gateway
            .invoke_streaming(
                &set,
                ModelPurpose::FastChat,
                vec![Message::user("hi")],
                |c| {
                    seen.push(c.to_string());
                    Ok(())
                },
                &InvokeOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hel", "lo, ", "world"]);
        assert_eq!(response.content, "Hello, world");
        assert_eq!(response.usage.total_tokens, 14);
        assert_eq!(response.purpose, ModelPurpose::FastChat);
        assert_eq!(response.provider, "mock");
    }

    #[tokio::test]
    async fn usage_is_summed_across_chunks() {
        let provider = ScriptedProvider::new(vec![
            Ok(StreamChunk {
                content: Some("a".into()),
                done: false,
                usage: Some(Usage { prompt_tokens: 5, completion_tokens: 0, total_tokens: 5 }),
            }),
            Ok(StreamChunk {
                content: None,
                done: true,
                usage: Some(Usage { prompt_tokens: 0, completion_tokens: 3, total_tokens: 3 }),
            }),
        ]);
        let gateway = gateway_with("mock", provider);
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));

        let response = gateway
            .invoke_streaming(&set, ModelPurpose::Chat, vec![], |_| Ok(()), &InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(response.usage, Usage { prompt_tokens: 5, completion_tokens: 3, total_tokens: 8 });
    }

    #[tokio::test]
    async fn mid_stream_error_surfaces_as_provider_invocation() {
        let provider = ScriptedProvider::new(vec![
            Ok(StreamChunk { content: Some("partial".into()), done: false, usage: None }),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ]);
        let gateway = gateway_with("mock", provider);
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));

        let err = gateway
            .invoke_streaming(&set, ModelPurpose::Chat, vec![], |_| Ok(()), &InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::ProviderInvocation(ProviderError::StreamInterrupted(_))
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn callback_error_stops_consumption() {
        let provider = ScriptedProvider::text(&["one", "two", "three"]);
        let gateway = gateway_with("mock", provider);
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));

        let mut count = 0;
        let err = gateway
            .invoke_streaming(
                &set,
                ModelPurpose::Chat,
                vec![],
                |_| {
                    count += 1;
                    if count == 2 {
                        Err(AgentError::ProtocolViolation("closed".into()))
                    } else {
                        Ok(())
                    }
                },
                &InvokeOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "protocol_violation");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn options_override_spec_which_overrides_defaults() {
        let provider = ScriptedProvider::text(&["ok"]);
        let gateway = gateway_with("mock", provider.clone());
        let set = ModelSetConfig::new("s")
            .with_model(
                ModelPurpose::Reasoning,
                ModelSpec::new("mock", "think-1").with_temperature(0.5).with_max_tokens(2048),
            )
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));

        gateway
            .invoke(&set, ModelPurpose::Reasoning, vec![], &InvokeOptions::default().with_temperature(0.1))
            .await
            .unwrap();
        gateway
            .invoke(&set, ModelPurpose::Chat, vec![], &InvokeOptions::default())
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].model, "think-1");
        assert_eq!(requests[0].temperature, 0.1);
        assert_eq!(requests[0].max_tokens, Some(2048));
        assert_eq!(requests[1].temperature, 0.7);
        assert_eq!(requests[1].max_tokens, None);
    }

    #[tokio::test]
    async fn embedding_routes_to_embedding_spec() {
        let provider = ScriptedProvider::text(&[]);
        let gateway = gateway_with("embedder", provider);
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Embedding, ModelSpec::new("embedder", "embed-small"));

        let response = gateway
            .generate_embedding(&set, vec!["ab".into(), "abcd".into()])
            .await
            .unwrap();
        assert_eq!(response.model, "embed-small");
        assert_eq!(response.embeddings, vec![vec![2.0, 1.0], vec![4.0, 1.0]]);
    }

    #[tokio::test]
    async fn embedding_never_falls_back_to_chat() {
        let provider = ScriptedProvider::text(&[]);
        let gateway = gateway_with("mock", provider);
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));
        let err = gateway.generate_embedding(&set, vec!["x".into()]).await.unwrap_err();
        assert_eq!(err.code(), "model_resolution");
    }

    #[tokio::test]
    async fn successful_calls_publish_model_invoked() {
        let events = Arc::new(EventBus::new(8));
        let mut rx = events.subscribe();
        let gateway = gateway_with("mock", ScriptedProvider::text(&["hi"])).with_events(events);
        let set = ModelSetConfig::new("s")
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"));

        gateway
            .invoke_streaming(&set, ModelPurpose::Chat, vec![], |_| Ok(()), &InvokeOptions::default())
            .await
            .unwrap();

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ModelInvoked { purpose, tokens_used, .. } => {
                assert_eq!(purpose, "chat");
                assert_eq!(*tokens_used, 14);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_covers_every_registered_provider_in_id_order() {
        let gateway = ModelGateway::new(
            ProviderRegistry::new()
                .with("zeta", ScriptedProvider::text(&[]))
                .with("alpha", ScriptedProvider::text(&[])),
        );
        let results = gateway.health().await;
        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["alpha", "zeta"]);
        assert!(results.iter().all(|(_, r)| matches!(r, Ok(true))));
    }
}
