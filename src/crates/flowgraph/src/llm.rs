//! Provider-agnostic chat model contract.
//!
//! The engine orchestrates; it does not speak to any vendor API. Providers
//! implement [`ChatModel`] (see the `llm` crate for the HTTP client) and are
//! injected into agents as `Arc<dyn ChatModel>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::messages::Message;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Worth retrying: rate limits, 5xx, connection resets.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Not worth retrying: auth failures, malformed requests.
    #[error("provider error: {0}")]
    Permanent(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// A tool surface advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl UsageMetadata {
    pub fn add(&mut self, other: &UsageMetadata) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            temperature: None,
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<UsageMetadata>,
}

/// Chat-style language model. Implementations must be `Send + Sync`; share
/// them as `Arc<dyn ChatModel>`.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Fixed(String);

    #[async_trait]
    impl ChatModel for Fixed {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                message: Message::ai(self.0.clone()),
                usage: Some(UsageMetadata {
                    input_tokens: 3,
                    output_tokens: 2,
                    total_tokens: 5,
                }),
            })
        }
    }

    #[tokio::test]
    async fn trait_object_round_trip() {
        let model: Arc<dyn ChatModel> = Arc::new(Fixed("hello".to_string()));
        let resp = model
            .chat(ChatRequest::new(vec![Message::human("hi")]))
            .await
            .unwrap();
        assert_eq!(resp.message.content, "hello");
        assert_eq!(resp.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn usage_accumulates() {
        let mut total = UsageMetadata::default();
        total.add(&UsageMetadata {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        });
        total.add(&UsageMetadata {
            input_tokens: 1,
            output_tokens: 1,
            total_tokens: 2,
        });
        assert_eq!(total.total_tokens, 17);
    }
}
