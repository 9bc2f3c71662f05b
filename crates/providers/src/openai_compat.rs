//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, DeepSeek, Groq, vLLM, Together AI
//! and any endpoint exposing `/chat/completions` and `/embeddings`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE with usage)
//! - Batched embeddings, returned in input order
//! - Model listing and health checks

use async_trait::async_trait;
use futures::StreamExt;
use reflexa_core::error::ProviderError;
use reflexa_core::message::Message;
use reflexa_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// OpenRouter (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// OpenAI (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Ollama, which ignores the key.
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn chat_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        accept_sse: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        if accept_sse {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(map_reqwest_error)?;
        check_status(response).await
    }
}

/// Distinguish client-side timeouts from other transport failures.
pub(crate) fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Map non-success statuses to typed provider errors.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if status == 404 {
        let error_body = response.text().await.unwrap_or_default();
        return Err(ProviderError::ModelNotFound(error_body));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// What a single SSE `data:` payload means for the consumer.
#[derive(Debug, PartialEq)]
enum SseEvent {
    /// A text delta
    Delta(String),
    /// Final usage report (sent after the last delta with `include_usage`)
    Usage(Usage),
    /// `[DONE]`
    Done,
    /// Role-only, finish-reason-only or unparseable chunk
    Skip,
}

fn parse_sse_data(data: &str) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => {
            if let Some(usage) = resp.usage {
                return SseEvent::Usage(usage.into());
            }
            resp.choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty())
                .map(SseEvent::Delta)
                .unwrap_or(SseEvent::Skip)
        }
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            SseEvent::Skip
        }
    }
}

#[async_trait]
impl reflexa_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let body = Self::chat_body(&request, false);
        let response = self.post("/chat/completions", &body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let body = Self::chat_body(&request, true);
        let response = self.post("/chat/completions", &body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Read the SSE byte stream and forward deltas in arrival order
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut usage = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line: String = buffer.drain(..=line_end).collect();
                    let line = line.trim_end_matches(['\n', '\r']);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };

                    match parse_sse_data(data.trim()) {
                        SseEvent::Delta(content) => {
                            let chunk = StreamChunk {
                                content: Some(content),
                                done: false,
                                usage: None,
                            };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        SseEvent::Usage(u) => usage = Some(u),
                        SseEvent::Done => {
                            let _ = tx
                                .send(Ok(StreamChunk { content: None, done: true, usage }))
                                .await;
                            return;
                        }
                        SseEvent::Skip => {}
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx
                .send(Ok(StreamChunk { content: None, done: true, usage }))
                .await;
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });
        let response = self.post("/embeddings", &body, false).await?;

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        Ok(api_resp.into_embedding_response())
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingApiResponse {
    /// Vectors ordered by their `index` so they line up with the inputs.
    fn into_embedding_response(mut self) -> EmbeddingResponse {
        if self.data.iter().all(|d| d.index.is_some()) {
            self.data.sort_by_key(|d| d.index);
        }
        EmbeddingResponse {
            embeddings: self.data.into_iter().map(|d| d.embedding).collect(),
            model: self.model,
            usage: self.usage.map(Usage::from),
        }
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflexa_core::{Provider, Role};

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url().contains("openrouter.ai"));
    }

    #[test]
    fn ollama_constructor_trims_trailing_slash() {
        let provider = OpenAiCompatProvider::ollama(Some("http://gpu-box:11434/v1/"));
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.base_url(), "http://gpu-box:11434/v1");
    }

    #[test]
    fn message_conversion_uses_role_names() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi"),
        ];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        let roles: Vec<_> = api_messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
        assert_eq!(Role::User.as_str(), "user");
    }

    #[test]
    fn streaming_body_requests_usage() {
        let request = ProviderRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.1,
            max_tokens: Some(512),
            stream: true,
            stop: vec![],
        };
        let body = OpenAiCompatProvider::chat_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 512);
        assert!(body.get("stop").is_none());

        let plain = OpenAiCompatProvider::chat_body(&request, false);
        assert!(plain.get("stream_options").is_none());
    }

    #[test]
    fn sse_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_data(data), SseEvent::Delta("Hello".into()));
    }

    #[test]
    fn sse_finish_and_role_chunks_are_skipped() {
        let finish = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let role = r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#;
        assert_eq!(parse_sse_data(finish), SseEvent::Skip);
        assert_eq!(parse_sse_data(role), SseEvent::Skip);
        assert_eq!(parse_sse_data("{not json"), SseEvent::Skip);
    }

    #[test]
    fn sse_usage_and_done() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        assert_eq!(
            parse_sse_data(data),
            SseEvent::Usage(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 })
        );
        assert_eq!(parse_sse_data("[DONE]"), SseEvent::Done);
    }

    #[test]
    fn embedding_response_is_reordered_by_index() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5, 0.6], "index": 1},
                {"embedding": [0.1, 0.2, 0.3], "index": 0}
            ],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 8, "total_tokens": 8}
        }"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        let resp = parsed.into_embedding_response();
        assert_eq!(resp.embeddings, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
        assert_eq!(resp.model, "text-embedding-3-small");
        assert_eq!(resp.usage.unwrap().prompt_tokens, 8);
    }
}
