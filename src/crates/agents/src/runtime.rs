//! The agent execution loop.
//!
//! An [`Agent`] is a model (already wrapped in capture interceptors), a tool
//! set, a system prompt, and a name. [`Agent::run`] drives the familiar
//! loop: call the model, execute any requested tools, feed the results back,
//! until the model answers in plain text or the iteration bound is hit; at
//! which point one final call without tools forces an answer.
//!
//! Failures follow one policy: anything unhandled becomes an
//! `AIMessage("Error in <name>: <reason>")` tagged with the agent's
//! identity, flowing through state like any other update. The graph's
//! routers decide what to do with it; a single broken agent never aborts a
//! run.

use flowgraph::llm::{ChatRequest, LlmError};
use flowgraph::{ChatModel, Message, RetryPolicy, ToolDefinition, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureBuffer;
use crate::error::AgentError;
use crate::structured::{extract_json, repair_prompt};

pub struct Agent {
    pub name: String,
    pub agent_type: String,
    primary: Arc<dyn ChatModel>,
    fixing: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    capture: Option<Arc<CaptureBuffer>>,
    max_iters: usize,
    max_fix: usize,
    temperature: Option<f32>,
    parallel_tools: bool,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        agent_type: impl Into<String>,
        primary: Arc<dyn ChatModel>,
        fixing: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            primary,
            fixing,
            tools: Arc::new(ToolRegistry::new()),
            system_prompt: String::new(),
            capture: None,
            max_iters: 15,
            max_fix: 3,
            temperature: None,
            parallel_tools: false,
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Tool result messages are recorded here so the UI sees them between
    /// the captured model calls.
    pub fn with_capture(mut self, buffer: Arc<CaptureBuffer>) -> Self {
        self.capture = Some(buffer);
        self
    }

    pub fn with_limits(mut self, max_iters: usize, max_fix: usize) -> Self {
        self.max_iters = max_iters;
        self.max_fix = max_fix;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Run a batch of tool calls concurrently instead of one by one. Search
    /// fan-out is the one place that wants this.
    pub fn with_parallel_tools(mut self) -> Self {
        self.parallel_tools = true;
        self
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for param in &tool.params {
                    properties.insert(param.name.clone(), json!({"type": "string"}));
                    if param.required {
                        required.push(param.name.clone());
                    }
                }
                ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: json!({
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    }),
                }
            })
            .collect()
    }

    fn request(&self, messages: &[Message], with_tools: bool) -> ChatRequest {
        let mut all = Vec::with_capacity(messages.len() + 1);
        if !self.system_prompt.is_empty() {
            all.push(Message::system(self.system_prompt.clone()));
        }
        all.extend_from_slice(messages);
        let mut request = ChatRequest::new(all);
        if with_tools && !self.tools.is_empty() {
            request = request.with_tools(self.tool_definitions());
        }
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }
        request
    }

    fn error_message(&self, reason: impl std::fmt::Display) -> Message {
        let mut message = Message::ai(format!("Error in {}: {reason}", self.name))
            .with_agent_type(self.agent_type.clone())
            .with_kwarg(
                flowgraph::messages::KW_ERROR_TYPE.to_string(),
                json!("agent_error"),
            );
        message.ensure_id();
        message
    }

    async fn call(&self, model: &Arc<dyn ChatModel>, request: ChatRequest) -> Result<Message, LlmError> {
        let retry = RetryPolicy::model_calls();
        let response = retry
            .run(|| model.chat(request.clone()), LlmError::is_transient)
            .await?;
        Ok(response.message)
    }

    /// Tool loop until the model answers without tool calls. Never fails:
    /// model errors come back as a tagged error message.
    pub async fn run(&self, mut transcript: Vec<Message>, cancel: &CancellationToken) -> Message {
        for _ in 0..self.max_iters {
            if cancel.is_cancelled() {
                return self.error_message("cancelled");
            }
            let reply = match self.call(&self.primary, self.request(&transcript, true)).await {
                Ok(reply) => reply,
                Err(e) => return self.error_message(e),
            };

            if reply.has_tool_calls() && !self.tools.is_empty() {
                transcript.push(reply.clone());
                let outputs: Vec<String> = if self.parallel_tools && reply.tool_calls.len() > 1 {
                    futures::future::join_all(
                        reply
                            .tool_calls
                            .iter()
                            .map(|call| self.tools.dispatch(&call.name, &call.arguments, cancel)),
                    )
                    .await
                } else {
                    let mut outputs = Vec::with_capacity(reply.tool_calls.len());
                    for call in &reply.tool_calls {
                        outputs.push(self.tools.dispatch(&call.name, &call.arguments, cancel).await);
                    }
                    outputs
                };
                for (call, output) in reply.tool_calls.iter().zip(outputs) {
                    let mut tool_msg = Message::tool(output, call.name.clone())
                        .with_agent_type(self.agent_type.clone())
                        .with_timestamp();
                    tool_msg.ensure_id();
                    if let Some(capture) = &self.capture {
                        capture.record(tool_msg.clone());
                    }
                    transcript.push(tool_msg);
                }
                continue;
            }

            let mut final_message = reply.with_agent_type(self.agent_type.clone());
            final_message.ensure_id();
            return final_message;
        }

        // Iteration bound hit: force a plain generation without tools.
        tracing::warn!(agent = %self.name, "iteration bound reached, forcing final answer");
        match self.call(&self.primary, self.request(&transcript, false)).await {
            Ok(reply) => {
                let mut final_message = reply.with_agent_type(self.agent_type.clone());
                final_message.ensure_id();
                final_message
            }
            Err(e) => self.error_message(e),
        }
    }

    /// Run, then parse the reply as JSON; on failure re-ask through the
    /// fixing stream up to `max_fix` times.
    pub async fn run_structured(
        &self,
        transcript: Vec<Message>,
        schema_hint: &str,
        cancel: &CancellationToken,
    ) -> Result<(Value, Message), AgentError> {
        let reply = self.run(transcript.clone(), cancel).await;
        if let Some(parsed) = extract_json(&reply.content) {
            return Ok((parsed, reply));
        }

        let mut last_output = reply.content.clone();
        for attempt in 0..self.max_fix {
            let mut repair_transcript = transcript.clone();
            repair_transcript.push(Message::human(repair_prompt(schema_hint, &last_output)));
            match self.call(&self.fixing, self.request(&repair_transcript, false)).await {
                Ok(fixed) => {
                    if let Some(parsed) = extract_json(&fixed.content) {
                        let mut message = fixed.with_agent_type(self.agent_type.clone());
                        message.ensure_id();
                        return Ok((parsed, message));
                    }
                    last_output = fixed.content;
                }
                Err(e) => {
                    tracing::warn!(agent = %self.name, attempt, error = %e, "fixing call failed");
                }
            }
        }
        Err(AgentError::Unparseable {
            agent: self.name.clone(),
            attempts: self.max_fix + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureBuffer, CaptureInterceptor};
    use crate::testing::MockChatModel;
    use flowgraph::tool::{tool_fn, ParamSpec, Tool};
    use flowgraph::ToolCall;

    fn agent_with(model: Arc<MockChatModel>, tools: Arc<ToolRegistry>) -> (Agent, Arc<CaptureBuffer>) {
        let buffer = CaptureBuffer::new();
        let (primary, fixing) = CaptureInterceptor::pair(model, "test_agent", buffer.clone());
        let agent = Agent::new("tester", "test_agent", primary, fixing)
            .with_tools(tools)
            .with_capture(buffer.clone())
            .with_system_prompt("You are a test agent.");
        (agent, buffer)
    }

    fn calc_tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Tool::new(
            "double",
            "double a number",
            vec![ParamSpec::required("input")],
            tool_fn(|args| async move {
                let n = args["input"].as_i64().unwrap_or(0);
                Ok((n * 2).to_string())
            }),
        ));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn plain_answer_returns_tagged_message() {
        let model = Arc::new(MockChatModel::replying(["the answer"]));
        let (agent, _) = agent_with(model, Arc::new(ToolRegistry::new()));
        let reply = agent
            .run(vec![Message::human("question")], &CancellationToken::new())
            .await;
        assert_eq!(reply.content, "the answer");
        assert_eq!(reply.agent_type(), Some("test_agent"));
        assert!(reply.id.is_some());
    }

    #[tokio::test]
    async fn tool_loop_feeds_results_back() {
        let model = Arc::new(MockChatModel::new());
        model.push_reply(
            Message::ai("").with_tool_calls(vec![ToolCall::new("double", json!({"input": 21}))]),
        );
        model.push_reply(Message::ai("it is 42"));

        let (agent, buffer) = agent_with(model.clone(), calc_tools());
        let reply = agent
            .run(vec![Message::human("double 21")], &CancellationToken::new())
            .await;
        assert_eq!(reply.content, "it is 42");
        assert_eq!(model.call_count(), 2);

        // the tool result went back into the second request
        let second = &model.requests()[1];
        assert!(second
            .messages
            .iter()
            .any(|m| m.role == flowgraph::MessageRole::Tool && m.content == "42"));
        // and was captured for the UI
        assert!(buffer
            .drain()
            .iter()
            .any(|m| m.role == flowgraph::MessageRole::Tool));
    }

    #[tokio::test]
    async fn structured_parses_first_try() {
        let model = Arc::new(MockChatModel::replying([r#"{"passed": true, "reason": "clean"}"#]));
        let (agent, _) = agent_with(model, Arc::new(ToolRegistry::new()));
        let (value, _) = agent
            .run_structured(
                vec![Message::human("review")],
                r#"{"passed": bool, "reason": string}"#,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(value["passed"], json!(true));
    }

    #[tokio::test]
    async fn structured_repairs_through_fixing_stream() {
        let model = Arc::new(MockChatModel::replying([
            "sure! the review passed.",
            r#"{"passed": true, "reason": "repaired"}"#,
        ]));
        let (agent, _) = agent_with(model.clone(), Arc::new(ToolRegistry::new()));
        let (value, _) = agent
            .run_structured(
                vec![Message::human("review")],
                r#"{"passed": bool, "reason": string}"#,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(value["reason"], json!("repaired"));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn structured_gives_up_after_max_fix() {
        let model = Arc::new(MockChatModel::new()); // always "ok", never JSON
        let (agent, _) = agent_with(model.clone(), Arc::new(ToolRegistry::new()));
        let agent = agent.with_limits(15, 2);
        let err = agent
            .run_structured(
                vec![Message::human("review")],
                "{}",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unparseable { .. }));
        // first run + 2 fixing attempts
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn iteration_bound_forces_final_answer() {
        let model = Arc::new(MockChatModel::new());
        // every scripted reply asks for another tool call
        for _ in 0..3 {
            model.push_reply(
                Message::ai("").with_tool_calls(vec![ToolCall::new("double", json!({"input": 1}))]),
            );
        }
        model.push_reply(Message::ai("forced answer"));

        let (agent, _) = agent_with(model.clone(), calc_tools());
        let agent = agent.with_limits(3, 1);
        let reply = agent
            .run(vec![Message::human("loop")], &CancellationToken::new())
            .await;
        assert_eq!(reply.content, "forced answer");
        // the forced call advertises no tools
        let last = model.requests().last().unwrap().clone();
        assert!(last.tools.is_empty());
    }
}
