//! Message capture around model calls.
//!
//! Every model invocation in a subgraph goes through a [`CaptureInterceptor`]
//! so the streaming layer can show the conversation as it happens. The
//! interceptor records the outbound prompt messages and the inbound
//! completion, stamps each with the agent identity
//! (`"<subgraph>_<node>"`), a monotonic call index, and the capture stream
//! (`primary` for normal calls, `fixing` for structured-output repair), and
//! accumulates usage. Nodes call [`CaptureBuffer::drain`] after each step to
//! hand the batch to the emitter.

use async_trait::async_trait;
use flowgraph::llm::{ChatModel, ChatRequest, ChatResponse, Result};
use flowgraph::messages::{KW_USAGE, Message};
use flowgraph::UsageMetadata;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Which stream a capture came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Primary,
    Fixing,
}

impl StreamKind {
    fn label(self) -> &'static str {
        match self {
            StreamKind::Primary => "primary",
            StreamKind::Fixing => "fixing",
        }
    }
}

/// Shared capture sink for one node execution.
#[derive(Default)]
pub struct CaptureBuffer {
    messages: Mutex<Vec<Message>>,
    call_index: AtomicU64,
    usage: Mutex<UsageMetadata>,
}

impl CaptureBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remove and return everything captured so far, in call order.
    pub fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub fn usage(&self) -> UsageMetadata {
        *self.usage.lock()
    }

    pub fn record(&self, mut message: Message) {
        message.ensure_id();
        self.messages.lock().push(message);
    }

    fn next_call_index(&self) -> u64 {
        self.call_index.fetch_add(1, Ordering::SeqCst)
    }

    fn add_usage(&self, usage: &UsageMetadata) {
        self.usage.lock().add(usage);
    }
}

/// `ChatModel` wrapper that captures in/out messages into a buffer.
pub struct CaptureInterceptor {
    model: Arc<dyn ChatModel>,
    agent_type: String,
    stream: StreamKind,
    buffer: Arc<CaptureBuffer>,
}

impl CaptureInterceptor {
    pub fn new(
        model: Arc<dyn ChatModel>,
        agent_type: impl Into<String>,
        stream: StreamKind,
        buffer: Arc<CaptureBuffer>,
    ) -> Self {
        Self {
            model,
            agent_type: agent_type.into(),
            stream,
            buffer,
        }
    }

    /// Primary + fixing pair over one buffer.
    pub fn pair(
        model: Arc<dyn ChatModel>,
        agent_type: &str,
        buffer: Arc<CaptureBuffer>,
    ) -> (Arc<Self>, Arc<Self>) {
        (
            Arc::new(Self::new(
                Arc::clone(&model),
                agent_type,
                StreamKind::Primary,
                Arc::clone(&buffer),
            )),
            Arc::new(Self::new(model, agent_type, StreamKind::Fixing, buffer)),
        )
    }

    fn tag(&self, message: &Message, call_index: u64, captured: &str) -> Message {
        message
            .clone()
            .with_agent_type(self.agent_type.clone())
            .with_kwarg("captured", json!(captured))
            .with_kwarg("stream", json!(self.stream.label()))
            .with_kwarg("call_index", json!(call_index))
            .with_timestamp()
    }
}

#[async_trait]
impl ChatModel for CaptureInterceptor {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let call_index = self.buffer.next_call_index();
        // system prompts stay server-side
        for prompt in request
            .messages
            .iter()
            .filter(|m| m.role != flowgraph::MessageRole::System)
        {
            self.buffer.record(self.tag(prompt, call_index, "prompt"));
        }

        let response = self.model.chat(request).await?;

        let mut completion = self.tag(&response.message, call_index, "completion");
        if let Some(usage) = &response.usage {
            self.buffer.add_usage(usage);
            let encoded = serde_json::to_value(usage).unwrap_or(serde_json::Value::Null);
            completion
                .additional_kwargs
                .insert(KW_USAGE.to_string(), encoded);
        }
        self.buffer.record(completion);
        Ok(response)
    }
}

/// Completions only, in order; the user-visible slice of a capture batch.
pub fn completions(captured: &[Message]) -> Vec<Message> {
    captured
        .iter()
        .filter(|m| {
            m.additional_kwargs
                .get("captured")
                .and_then(|v| v.as_str())
                == Some("completion")
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChatModel;

    #[tokio::test]
    async fn captures_prompt_and_completion_with_tags() {
        let buffer = CaptureBuffer::new();
        let model = Arc::new(MockChatModel::replying(["fine, thanks"]));
        let (primary, _fixing) = CaptureInterceptor::pair(model, "data_science_process_agent", buffer.clone());

        primary
            .chat(ChatRequest::new(vec![Message::human("how are you?")]))
            .await
            .unwrap();

        let captured = buffer.drain();
        assert_eq!(captured.len(), 2);
        for m in &captured {
            assert_eq!(m.agent_type(), Some("data_science_process_agent"));
            assert!(m.id.is_some());
        }
        let only = completions(&captured);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].content, "fine, thanks");
    }

    #[tokio::test]
    async fn call_index_is_monotonic_and_drain_empties() {
        let buffer = CaptureBuffer::new();
        let model = Arc::new(MockChatModel::replying(["a", "b"]));
        let (primary, _) = CaptureInterceptor::pair(model, "t", buffer.clone());

        primary.chat(ChatRequest::new(vec![Message::human("1")])).await.unwrap();
        primary.chat(ChatRequest::new(vec![Message::human("2")])).await.unwrap();

        let captured = buffer.drain();
        let indexes: Vec<u64> = captured
            .iter()
            .map(|m| m.additional_kwargs["call_index"].as_u64().unwrap())
            .collect();
        assert_eq!(indexes, vec![0, 0, 1, 1]);
        assert!(buffer.drain().is_empty());
    }

    #[tokio::test]
    async fn fixing_stream_is_labelled() {
        let buffer = CaptureBuffer::new();
        let model = Arc::new(MockChatModel::replying(["ok"]));
        let (_, fixing) = CaptureInterceptor::pair(model, "t", buffer.clone());
        fixing.chat(ChatRequest::new(vec![Message::human("fix")])).await.unwrap();
        let captured = buffer.drain();
        assert!(captured
            .iter()
            .all(|m| m.additional_kwargs["stream"] == json!("fixing")));
    }
}
