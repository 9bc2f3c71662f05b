//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Adjacent same-role turns merged, since the API requires alternation
//! - Streaming via SSE `content_block_delta` text events, usage from
//!   `message_start` and `message_delta`

use async_trait::async_trait;
use futures::StreamExt;
use reflexa_core::error::ProviderError;
use reflexa_core::message::{Message, Role};
use reflexa_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::openai_compat::{check_status, map_reqwest_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Use a custom base URL (e.g., for proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Register under a different provider id.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Split system messages out and merge adjacent same-role turns.
    fn to_api_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let role = match msg.role {
                Role::System => {
                    system_parts.push(&msg.content);
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "assistant",
            };

            match turns.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&msg.content);
                }
                _ => turns.push(AnthropicMessage {
                    role: role.into(),
                    content: msg.content.clone(),
                }),
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, turns)
    }

    fn messages_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::to_api_messages(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }

        body
    }

    async fn post_messages(
        &self,
        body: &serde_json::Value,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        check_status(response).await
    }
}

/// Folds Anthropic SSE events into stream chunks.
#[derive(Default)]
struct SseState {
    input_tokens: u32,
    output_tokens: u32,
    saw_usage: bool,
}

impl SseState {
    /// Returns a chunk to forward, if the event carries one.
    fn handle(&mut self, event: &serde_json::Value) -> Option<std::result::Result<StreamChunk, ProviderError>> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                if let Some(inp) = usage["input_tokens"].as_u64() {
                    self.input_tokens = inp as u32;
                    self.saw_usage = true;
                }
                if let Some(out) = usage["output_tokens"].as_u64() {
                    self.output_tokens = out as u32;
                }
                None
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                if delta["type"].as_str() != Some("text_delta") {
                    return None;
                }
                delta["text"]
                    .as_str()
                    .filter(|t| !t.is_empty())
                    .map(|text| {
                        Ok(StreamChunk {
                            content: Some(text.to_string()),
                            done: false,
                            usage: None,
                        })
                    })
            }
            "message_delta" => {
                // Output tokens here are cumulative
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = out as u32;
                    self.saw_usage = true;
                }
                None
            }
            "message_stop" => Some(Ok(self.finish())),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                Some(Err(ProviderError::StreamInterrupted(message)))
            }
            _ => None,
        }
    }

    fn finish(&self) -> StreamChunk {
        StreamChunk {
            content: None,
            done: true,
            usage: self.saw_usage.then(|| Usage {
                prompt_tokens: self.input_tokens,
                completion_tokens: self.output_tokens,
                total_tokens: self.input_tokens + self.output_tokens,
            }),
        }
    }
}

#[async_trait]
impl reflexa_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let body = Self::messages_body(&request, false);
        let response = self.post_messages(&body).await?;

        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(api_resp.into_provider_response())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let body = Self::messages_body(&request, true);
        let response = self.post_messages(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut state = SseState::default();

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
                    // The `event:` line repeats the `type` field of the data line
                    let Some(data) = line.trim_end().strip_prefix("data:") else {
                        continue;
                    };

                    let event: serde_json::Value = match serde_json::from_str(data.trim()) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    if let Some(item) = state.handle(&event) {
                        let terminal = !matches!(&item, Ok(chunk) if !chunk.done);
                        if tx.send(item).await.is_err() || terminal {
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop
            let _ = tx.send(Ok(state.finish())).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Ok(response.status().as_u16() != 401)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicResponse {
    fn into_provider_response(self) -> ProviderResponse {
        let text = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: self.usage.input_tokens,
                completion_tokens: self.usage.output_tokens,
                total_tokens: self.usage.input_tokens + self.usage.output_tokens,
            }),
            model: self.model,
        }
    }
}
