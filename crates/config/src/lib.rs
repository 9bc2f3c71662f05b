//! Configuration loading, validation, and management for Reflexa.
//!
//! Loads configuration from `~/.reflexa/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use reflexa_core::model::{ModelPurpose, ModelSetConfig, ModelSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Memory backends understood by the vector store factory.
pub const MEMORY_BACKENDS: [&str; 4] = ["in_memory", "sqlite", "qdrant", "none"];

/// The root configuration structure.
///
/// Maps directly to `~/.reflexa/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model set used when a session doesn't pick one
    #[serde(default = "default_model_set_name")]
    pub default_model_set: String,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Named model sets: set name -> purpose -> model spec
    #[serde(default = "default_model_sets")]
    pub model_sets: HashMap<String, ModelSetConfig>,
}

fn default_model_set_name() -> String {
    "default".into()
}

fn default_model_sets() -> HashMap<String, ModelSetConfig> {
    let set = ModelSetConfig::new("default")
        .with_model(
            ModelPurpose::Reasoning,
            ModelSpec::new("openrouter", "anthropic/claude-sonnet-4"),
        )
        .with_model(
            ModelPurpose::Chat,
            ModelSpec::new("openrouter", "anthropic/claude-sonnet-4"),
        )
        .with_model(
            ModelPurpose::FastChat,
            ModelSpec::new("openrouter", "openai/gpt-4o-mini"),
        )
        .with_model(
            ModelPurpose::Embedding,
            ModelSpec::new("openai", "text-embedding-3-small"),
        );
    HashMap::from([(set.name.clone(), set)])
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_model_set", &self.default_model_set)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("providers", &self.providers)
            .field("model_sets", &self.model_sets)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Decision loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Hard cap on decide/execute iterations per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Reply language (ISO 639-1)
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_decision_temperature")]
    pub decision_temperature: f32,

    #[serde(default = "default_decision_max_tokens")]
    pub decision_max_tokens: u32,

    /// Buffer stream fragments up to this many bytes before emitting (0 = off)
    #[serde(default)]
    pub coalesce_bytes: usize,

    /// Generate a conversation title on the first turn
    #[serde(default = "default_true")]
    pub generate_title: bool,
}

fn default_max_iterations() -> usize {
    8
}
fn default_language() -> String {
    "en".into()
}
fn default_decision_temperature() -> f32 {
    0.1
}
fn default_decision_max_tokens() -> u32 {
    512
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            language: default_language(),
            decision_temperature: default_decision_temperature(),
            decision_max_tokens: default_decision_max_tokens(),
            coalesce_bytes: 0,
            generate_title: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// One of `in_memory`, `sqlite`, `qdrant`, `none`
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite database file (defaults to `~/.reflexa/memory.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Qdrant base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Embed and store each finished exchange
    #[serde(default = "default_true")]
    pub auto_save: bool,

    /// Concurrent vector searches per memory lookup (1 = sequential)
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_search_concurrency() -> usize {
    1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            url: None,
            api_key: None,
            auto_save: true,
            search_concurrency: default_search_concurrency(),
        }
    }
}

impl std::fmt::Debug for MemoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConfig")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("auto_save", &self.auto_save)
            .field("search_concurrency", &self.search_concurrency)
            .finish()
    }
}

impl MemoryConfig {
    /// Resolved SQLite path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory.db"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.reflexa/config.toml).
    ///
    /// Also checks environment variables:
    /// - `REFLEXA_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `REFLEXA_MODEL_SET` overrides `default_model_set`
    /// - `REFLEXA_LANGUAGE` overrides `agent.language`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("REFLEXA_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(set) = lookup("REFLEXA_MODEL_SET") {
            self.default_model_set = set;
        }

        if let Some(language) = lookup("REFLEXA_LANGUAGE") {
            self.agent.language = language;
        }
    }

    /// Model sets keyed in TOML carry their name in the key only.
    fn normalize(&mut self) {
        for (name, set) in self.model_sets.iter_mut() {
            if set.name.is_empty() {
                set.name = name.clone();
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".reflexa")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.agent.decision_temperature) {
            return Err(ConfigError::ValidationError(
                "agent.decision_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.language.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.language must not be empty".into(),
            ));
        }

        if !MEMORY_BACKENDS.contains(&self.memory.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "memory.backend '{}' is not one of {}",
                self.memory.backend,
                MEMORY_BACKENDS.join(", ")
            )));
        }

        if self.memory.search_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "memory.search_concurrency must be at least 1".into(),
            ));
        }

        if !self.model_sets.contains_key(&self.default_model_set) {
            return Err(ConfigError::ValidationError(format!(
                "default_model_set '{}' is not defined in model_sets",
                self.default_model_set
            )));
        }

        for (name, set) in &self.model_sets {
            for (purpose, spec) in &set.models {
                if spec.provider.is_empty() || spec.model.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "model_sets.{name}.{purpose} needs both provider and model"
                    )));
                }
                if spec.temperature.is_some_and(|t| !(0.0..=2.0).contains(&t)) {
                    return Err(ConfigError::ValidationError(format!(
                        "model_sets.{name}.{purpose}.temperature must be between 0.0 and 2.0"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a model set by name, or the default set when `name` is None.
    pub fn model_set(&self, name: Option<&str>) -> Option<&ModelSetConfig> {
        self.model_sets.get(name.unwrap_or(&self.default_model_set))
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model_set: default_model_set_name(),
            agent: AgentSettings::default(),
            memory: MemoryConfig::default(),
            providers: HashMap::new(),
            model_sets: default_model_sets(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
