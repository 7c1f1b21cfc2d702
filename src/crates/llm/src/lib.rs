//! llm: provider implementations of the `flowgraph::ChatModel` contract.
//!
//! One concrete client (OpenAI-compatible chat completions over HTTP) plus a
//! registry that turns `(provider_id, role)` into a ready `Arc<dyn
//! ChatModel>`. Base URLs, keys, and model identifiers are configuration;
//! see [`config::ProviderConfig`].

pub mod config;
pub mod error;
pub mod openai_compat;
pub mod registry;

pub use config::{ProviderConfig, ROLE_CODER, ROLE_DEFAULT, ROLE_PLANNER, ROLE_REVIEWER};
pub use error::{LlmConfigError, Result};
pub use openai_compat::OpenAiCompatClient;
pub use registry::ProviderRegistry;

// Re-export the call-time contract for convenience.
pub use flowgraph::llm::{ChatModel, ChatRequest, ChatResponse, LlmError, UsageMetadata};
