//! Message types shared by the engine, agents, and the streaming layer.
//!
//! A [`Message`] is the unit that travels through graph state and out to
//! clients. Two invariants matter everywhere:
//!
//! - every message emitted to a client carries a stable `id`, and
//! - every emitted message carries a non-empty `agent_type` in
//!   `additional_kwargs` so the frontend can attribute it.
//!
//! Messages are shared by value after emission; nothing edits one in place
//! once it has left a node.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Well-known `additional_kwargs` keys.
pub const KW_AGENT_TYPE: &str = "agent_type";
pub const KW_TIMESTAMP: &str = "timestamp";
pub const KW_FILES: &str = "files";
pub const KW_ERROR_TYPE: &str = "error_type";
pub const KW_USAGE: &str = "usage_metadata";

/// Role of the message sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    Human,
    Ai,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }
}

/// One message in a conversation or run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    /// Agent or tool that produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_kwargs: Map<String, Value>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            additional_kwargs: Map::new(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Ai, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn tool(content: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content).with_name(tool_name)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_kwargs.insert(key.into(), value);
        self
    }

    /// Tag the message with the agent identity the frontend attributes it to.
    pub fn with_agent_type(self, agent_type: impl Into<String>) -> Self {
        self.with_kwarg(KW_AGENT_TYPE, json!(agent_type.into()))
    }

    /// Assign a fresh UUID if the message has no id yet. Returns the id.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
        self.id.as_deref().unwrap_or_default()
    }

    pub fn agent_type(&self) -> Option<&str> {
        self.additional_kwargs.get(KW_AGENT_TYPE)?.as_str()
    }

    pub fn error_type(&self) -> Option<&str> {
        self.additional_kwargs.get(KW_ERROR_TYPE)?.as_str()
    }

    /// Stamp the current UTC time into `additional_kwargs.timestamp`.
    pub fn with_timestamp(self) -> Self {
        self.with_kwarg(KW_TIMESTAMP, json!(chrono::Utc::now().to_rfc3339()))
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Deserialize the `internal_messages` field of a state value.
pub fn messages_from_state(state: &Value, field: &str) -> Vec<Message> {
    state
        .get(field)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| serde_json::from_value(m.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Serialize messages for a state update.
pub fn messages_to_value(messages: &[Message]) -> Value {
    json!(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let m = Message::human("hi");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], json!("human"));
    }

    #[test]
    fn ensure_id_is_stable() {
        let mut m = Message::ai("answer");
        let first = m.ensure_id().to_string();
        let second = m.ensure_id().to_string();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn agent_type_round_trip() {
        let m = Message::ai("x").with_agent_type("data_science_code_agent");
        assert_eq!(m.agent_type(), Some("data_science_code_agent"));
    }

    #[test]
    fn state_round_trip() {
        let msgs = vec![
            Message::human("q").with_id("m1"),
            Message::ai("a").with_id("m2"),
        ];
        let state = json!({"internal_messages": messages_to_value(&msgs)});
        let back = messages_from_state(&state, "internal_messages");
        assert_eq!(back, msgs);
    }

    #[test]
    fn tool_calls_skipped_when_empty() {
        let v = serde_json::to_value(Message::ai("x")).unwrap();
        assert!(v.get("tool_calls").is_none());
    }
}
