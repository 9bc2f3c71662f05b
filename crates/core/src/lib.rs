//! # Reflexa Core
//!
//! Domain types, traits, and error definitions for the Reflexa agent runtime.
//! This crate has no framework dependencies: it defines the domain model
//! that all other crates implement against.
//!
//! Every external collaborator (LLM provider, vector store) is a trait here.
//! Implementations live in their own crates, so tests can swap in scripted
//! mocks and every crate depends inward on core.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod model;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, MemoryError, ParseError, ProviderError};
pub use event::{DomainEvent, EventBus};
pub use memory::{VectorMatch, VectorStore};
pub use message::{Conversation, ConversationId, Message, MessageKind, Role};
pub use model::{ModelPurpose, ModelSetConfig, ModelSpec};
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse,
    StreamChunk, Usage,
};
