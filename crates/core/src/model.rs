//! Model sets — which concrete model serves which logical purpose.
//!
//! A session carries one immutable [`ModelSetConfig`]. Callers ask for a
//! [`ModelPurpose`] and the gateway resolves it, walking the purpose's
//! fallback chain when the exact purpose is not configured.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The logical role a model call plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelPurpose {
    Reasoning,
    ReasoningHeavy,
    FastChat,
    Chat,
    Codegen,
    Embedding,
}

impl ModelPurpose {
    pub const ALL: [ModelPurpose; 6] = [
        Self::Reasoning,
        Self::ReasoningHeavy,
        Self::FastChat,
        Self::Chat,
        Self::Codegen,
        Self::Embedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::ReasoningHeavy => "reasoningHeavy",
            Self::FastChat => "fastChat",
            Self::Chat => "chat",
            Self::Codegen => "codegen",
            Self::Embedding => "embedding",
        }
    }

    /// Purposes tried, in order, when this one is not configured.
    ///
    /// Embedding never falls back: a chat model cannot produce vectors.
    pub fn fallback_chain(&self) -> &'static [ModelPurpose] {
        match self {
            Self::ReasoningHeavy => &[Self::Reasoning, Self::Chat],
            Self::Reasoning => &[Self::Chat],
            Self::Codegen => &[Self::Reasoning, Self::Chat],
            Self::FastChat => &[Self::Chat],
            Self::Chat => &[Self::FastChat],
            Self::Embedding => &[],
        }
    }
}

impl std::fmt::Display for ModelPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown model purpose '{s}'"))
    }
}

/// A concrete provider + model pairing with optional sampling overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider id, matching a key in the provider registry.
    pub provider: String,

    /// Model id as the provider knows it.
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A named set of model specs keyed by purpose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSetConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub models: BTreeMap<ModelPurpose, ModelSpec>,
}

impl ModelSetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, purpose: ModelPurpose, spec: ModelSpec) -> Self {
        self.models.insert(purpose, spec);
        self
    }

    /// Exact lookup, no fallback.
    pub fn get(&self, purpose: ModelPurpose) -> Option<&ModelSpec> {
        self.models.get(&purpose)
    }

    /// Look the purpose up, then walk its fallback chain.
    ///
    /// Returns the purpose that actually matched together with its spec.
    pub fn lookup(&self, purpose: ModelPurpose) -> Option<(ModelPurpose, &ModelSpec)> {
        std::iter::once(&purpose)
            .chain(purpose.fallback_chain())
            .find_map(|p| self.models.get(p).map(|spec| (*p, spec)))
    }

    /// Distinct provider ids referenced by this set.
    pub fn providers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.models.values().map(|s| s.provider.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
