//! Error types for the Reflexa domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`AgentError`] is what a
//! turn fails with.

use thiserror::Error;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a caller retrying with backoff has a reasonable chance of success.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::StreamInterrupted(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Failure to split a streamed response into body and JSON payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("response ended without the end-of-body sentinel line")]
    MissingSentinel,

    #[error("payload after the sentinel is not valid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("payload does not match the expected schema: {reason}")]
    Schema { reason: String },
}

/// Errors raised by the orchestration core (gateway resolution, actions, relay).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("No model configured for purpose '{purpose}' (tried: {})", tried.join(", "))]
    ModelResolution { purpose: String, tried: Vec<String> },

    #[error("Model spec references unknown provider '{provider}'")]
    UnknownProvider { provider: String },

    #[error("Provider invocation failed: {0}")]
    ProviderInvocation(#[from] ProviderError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Index alignment broken during {stage}: expected {expected}, got {actual}")]
    EmbeddingMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("No memory store backs '{0}'")]
    MemoryNotFound(String),

    #[error("Vector store failure: {0}")]
    VectorStore(#[from] MemoryError),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Action registered twice: {0}")]
    DuplicateAction(String),

    #[error("Message relay protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Turn cancelled")]
    Cancelled,
}

impl AgentError {
    /// Stable machine-readable code reported to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModelResolution { .. } => "model_resolution",
            Self::UnknownProvider { .. } | Self::DuplicateAction(_) => "configuration",
            Self::ProviderInvocation(_) => "provider_invocation",
            Self::Parse(_) => "parse",
            Self::EmbeddingMismatch { .. } => "embedding_mismatch",
            Self::MemoryNotFound(_) => "memory_not_found",
            Self::VectorStore(_) => "vector_store",
            Self::ActionNotFound(_) => "action_not_found",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Cancelled => "cancelled",
        }
    }

    /// Only transient provider failures are worth retrying; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderInvocation(e) => e.is_retryable(),
            _ => false,
        }
    }
}
