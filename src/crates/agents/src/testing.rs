//! Scripted chat model used by tests across the workspace.

use async_trait::async_trait;
use flowgraph::llm::{ChatModel, ChatRequest, ChatResponse, Result, UsageMetadata};
use flowgraph::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Replays queued replies in order; once the queue is empty every call
/// answers `"ok"`. Records every request for assertions.
#[derive(Default)]
pub struct MockChatModel {
    replies: Mutex<VecDeque<Message>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::new();
        for reply in replies {
            model.push_reply(Message::ai(reply.into()));
        }
        model
    }

    /// Queue a full message reply (tool calls included).
    pub fn push_reply(&self, message: Message) {
        self.replies.lock().push_back(message);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(request);
        let message = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Message::ai("ok"));
        Ok(ChatResponse {
            message,
            usage: Some(UsageMetadata {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}
