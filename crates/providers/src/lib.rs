//! LLM Provider implementations and the model gateway for Reflexa.
//!
//! All providers implement the `reflexa_core::Provider` trait. The registry
//! maps provider ids to instances and the gateway resolves logical purposes
//! to concrete models before routing through it.

pub mod anthropic;
pub mod gateway;
pub mod openai_compat;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use gateway::{GatewayResponse, InvokeOptions, ModelGateway, ResolvedModel};
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{ProviderRegistry, build_from_config};
