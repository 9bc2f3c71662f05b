//! Provider registry — provider id to provider instance.
//!
//! Built once at start-up from configuration. Model specs name a provider id
//! and the gateway looks it up here.

use std::collections::HashMap;
use std::sync::Arc;
use reflexa_core::provider::Provider;
use tracing::debug;
use crate::anthropic::{self, AnthropicProvider};
use crate::openai_compat::OpenAiCompatProvider;

/// Maps provider ids to provider instances.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under an id, replacing any previous one.
    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(id.into(), provider);
    }

    /// Builder-style registration.
    pub fn with(mut self, id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(id, provider);
        self
    }

    /// Get a provider by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Registered provider ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

/// Build providers from configuration.
///
/// Creates one provider per `[providers.*]` entry plus one for every provider
/// id referenced by a model set, using well-known base URLs for the latter.
pub fn build_from_config(config: &reflexa_config::AppConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    let mut ids: Vec<&str> = config.providers.keys().map(|s| s.as_str()).collect();
    ids.extend(config.model_sets.values().flat_map(|set| set.providers()));
    ids.sort_unstable();
    ids.dedup();

    for id in ids {
        let provider_config = config.providers.get(id);

        let api_key = provider_config
            .and_then(|p| p.api_key.clone())
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let api_url = provider_config.and_then(|p| p.api_url.clone());

        let provider: Arc<dyn Provider> = if id == "anthropic" {
            let p = AnthropicProvider::new(&api_key).with_name(id);
            Arc::new(match api_url {
                Some(url) => p.with_base_url(url),
                None => p,
            })
        } else {
            let base_url = api_url.unwrap_or_else(|| default_base_url(id));
            Arc::new(OpenAiCompatProvider::new(id, base_url, &api_key))
        };

        debug!(provider = %id, "Registered provider");
        registry.register(id, provider);
    }

    registry
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_id: &str) -> String {
    match provider_id {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => anthropic::DEFAULT_BASE_URL.into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "mistral" => "https://api.mistral.ai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_id}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflexa_config::{AppConfig, ProviderConfig};

    #[test]
    fn register_and_lookup() {
        let registry = ProviderRegistry::new()
            .with("openrouter", Arc::new(OpenAiCompatProvider::openrouter("sk-test")));

        assert!(registry.get("openrouter").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
        assert_eq!(default_base_url("anthropic"), "https://api.anthropic.com");
    }

    #[test]
    fn default_config_registers_model_set_providers() {
        let registry = build_from_config(&AppConfig::default());
        assert_eq!(registry.ids(), vec!["openai", "openrouter"]);
    }

    #[test]
    fn configured_providers_are_registered_under_their_id() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-ant".into()),
                api_url: None,
            },
        );
        config.providers.insert(
            "ollama".into(),
            ProviderConfig {
                api_key: None,
                api_url: Some("http://gpu-box:11434/v1".into()),
            },
        );

        let registry = build_from_config(&config);
        assert_eq!(registry.get("anthropic").unwrap().name(), "anthropic");
        assert_eq!(registry.get("ollama").unwrap().name(), "ollama");
        assert!(registry.contains("openrouter"));
    }
}
