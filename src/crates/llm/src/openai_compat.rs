//! Chat client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Most hosted and local providers this server talks to (OpenAI, OpenRouter,
//! vLLM, Ollama's compat layer) speak the same wire shape; which one is in
//! use is decided entirely by [`ProviderConfig`](crate::config::ProviderConfig).

use async_trait::async_trait;
use flowgraph::llm::{ChatModel, ChatRequest, ChatResponse, LlmError, Result, UsageMetadata};
use flowgraph::{Message, MessageRole, ToolCall};
use serde_json::{json, Value};

pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn wire_role(role: &MessageRole) -> &'static str {
        match role {
            MessageRole::System => "system",
            MessageRole::Human => "user",
            MessageRole::Ai => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    fn to_wire_message(message: &Message) -> Value {
        let mut wire = json!({
            "role": Self::wire_role(&message.role),
            "content": message.content,
        });
        if let Some(name) = &message.name {
            wire["name"] = json!(name);
        }
        if message.has_tool_calls() {
            wire["tool_calls"] = json!(message
                .tool_calls
                .iter()
                .enumerate()
                .map(|(i, call)| {
                    json!({
                        "id": call.id.clone().unwrap_or_else(|| format!("call_{i}")),
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect::<Vec<_>>());
        }
        wire
    }

    fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
        message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let name = call["function"]["name"].as_str()?;
                        let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                        let arguments = serde_json::from_str(raw_args)
                            .unwrap_or_else(|_| json!(raw_args));
                        Some(ToolCall {
                            name: name.to_string(),
                            arguments,
                            id: call["id"].as_str().map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_usage(body: &Value) -> Option<UsageMetadata> {
        let usage = body.get("usage")?;
        Some(UsageMetadata {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": request.messages.iter().map(Self::to_wire_message).collect::<Vec<_>>(),
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect::<Vec<_>>());
        }

        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LlmError::Transient(format!("provider returned {status}")));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(LlmError::Permanent(format!("provider returned {status}: {detail}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;
        let choice = &body["choices"][0]["message"];
        let content = choice["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = Self::parse_tool_calls(choice);

        let mut message = Message::ai(content);
        if !tool_calls.is_empty() {
            message = message.with_tool_calls(tool_calls);
        }

        Ok(ChatResponse {
            message,
            usage: Self::parse_usage(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_shape() {
        let msg = Message::human("hi").with_name("alice");
        let wire = OpenAiCompatClient::to_wire_message(&msg);
        assert_eq!(wire["role"], json!("user"));
        assert_eq!(wire["content"], json!("hi"));
        assert_eq!(wire["name"], json!("alice"));
    }

    #[test]
    fn tool_call_arguments_parse_from_string() {
        let choice = json!({
            "tool_calls": [{
                "id": "call_0",
                "function": {"name": "read_file", "arguments": "{\"path\": \"a.csv\"}"}
            }]
        });
        let calls = OpenAiCompatClient::parse_tool_calls(&choice);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], json!("a.csv"));
    }

    #[test]
    fn usage_parses() {
        let body = json!({"usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10}});
        let usage = OpenAiCompatClient::parse_usage(&body).unwrap();
        assert_eq!(usage.total_tokens, 10);
    }
}
