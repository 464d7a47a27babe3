//! # mcplink-providers
//!
//! LLM backends that answer provider-initiated sampling requests.
//!
//! This crate provides:
//! - Provider trait for abstracting LLM backends
//! - Implementations for Anthropic, OpenAI and Google Gemini
//! - Ordered credential discovery and model selection

pub mod anthropic;
pub mod credentials;
pub mod gemini;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use credentials::{ProviderCredentials, ProviderKind};
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
pub use traits::{CompletionRequest, CompletionResponse, FinishReason, Provider, Usage};
