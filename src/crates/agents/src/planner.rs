//! The XML router: one agent deciding between answering directly and
//! delegating to a registered subgraph.
//!
//! The router sees only the subgraphs advertised for the current request
//! (the data-science pipeline is advertised only when a CSV is referenced)
//! and answers either inline or with a `<subgraph>name</subgraph>` tag.
//! A tag naming anything outside the catalogue terminates the run with a
//! user-facing `non_existent_subgraph` error instead of guessing.

use flowgraph::messages::{KW_ERROR_TYPE, Message};
use flowgraph::{ChatModel, UsageMetadata};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureBuffer, CaptureInterceptor};
use crate::runtime::Agent;
use crate::structured::extract_tag;

pub const PLANNER_NAME: &str = "planner";

const ROUTING_RULES: &str = "\
You route user requests. If one of the available subgraphs below fits the \
request, reply with exactly one tag: <subgraph>NAME</subgraph>. If none \
fits, answer the user directly and end your reply with \
<subgraph>end</subgraph>. Never write code inline; code authoring always \
goes to a sandboxed subgraph.";

/// What the router decided for one request.
#[derive(Debug)]
pub enum RouteOutcome {
    /// No delegation; the tagged message is the final answer.
    Answer(Message),
    /// Hand off to a registered subgraph; `notice` is the routing message.
    Delegate { subgraph: String, notice: Message },
    /// The model chose a subgraph that is not in the catalogue.
    Unavailable(Message),
}

pub struct RouteResult {
    pub outcome: RouteOutcome,
    pub captured: Vec<Message>,
    pub usage: UsageMetadata,
}

pub struct Planner {
    model: Arc<dyn ChatModel>,
    name: String,
}

impl Planner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            name: PLANNER_NAME.to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn end_tag(&self) -> String {
        format!("{}_end", self.name)
    }

    /// Route one request. `catalogue` holds `(name, description)` pairs of
    /// the subgraphs advertised for this request.
    ///
    /// An empty catalogue never reaches the model: there is nothing to
    /// choose between, so the request routes straight to `end`.
    pub async fn route(
        &self,
        system_prompt: &str,
        text: &str,
        catalogue: &[(String, String)],
        cancel: &CancellationToken,
    ) -> RouteResult {
        if catalogue.is_empty() {
            let answer = Message::ai(
                "I don't have a workflow available for this request right now.",
            );
            return RouteResult {
                outcome: RouteOutcome::Answer(self.finalize(answer, &self.end_tag())),
                captured: Vec::new(),
                usage: UsageMetadata::default(),
            };
        }

        let buffer = CaptureBuffer::new();
        let (primary, fixing) =
            CaptureInterceptor::pair(Arc::clone(&self.model), &self.name, buffer.clone());

        let listing = catalogue
            .iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("{system_prompt}\n\n{ROUTING_RULES}\n\nAvailable subgraphs:\n{listing}");

        let agent = Agent::new(self.name.clone(), self.name.clone(), primary, fixing)
            .with_system_prompt(prompt)
            .with_capture(buffer.clone());

        let reply = agent.run(vec![Message::human(text)], cancel).await;
        let captured = buffer.drain();
        let usage = buffer.usage();

        let choice = extract_tag(&reply.content, "subgraph")
            .map(|c| c.trim_start_matches("subgraph_").to_string());

        let outcome = match choice.as_deref() {
            None | Some("end") | Some("") => {
                let mut answer = reply;
                answer.content = strip_subgraph_tag(&answer.content);
                RouteOutcome::Answer(self.finalize(answer, &self.end_tag()))
            }
            Some(name) if catalogue.iter().any(|(n, _)| n == name) => {
                let notice = self.finalize(
                    reply,
                    &format!("{}_subgraph_{}", self.name, name),
                );
                RouteOutcome::Delegate {
                    subgraph: name.to_string(),
                    notice,
                }
            }
            Some(name) => {
                let mut message = Message::ai(format!(
                    "I am not able to route to the {name} subgraph as it is not available"
                ))
                .with_kwarg(KW_ERROR_TYPE, json!("non_existent_subgraph"));
                message = self.finalize(message, &self.end_tag());
                RouteOutcome::Unavailable(message)
            }
        };

        RouteResult {
            outcome,
            captured,
            usage,
        }
    }

    fn finalize(&self, message: Message, agent_type: &str) -> Message {
        let mut message = message.with_agent_type(agent_type).with_timestamp();
        message.ensure_id();
        message
    }
}

fn strip_subgraph_tag(content: &str) -> String {
    match content.find("<subgraph>") {
        Some(start) => {
            let tail = match content[start..].find("</subgraph>") {
                Some(end) => &content[start + end + "</subgraph>".len()..],
                None => "",
            };
            format!("{}{}", &content[..start], tail).trim().to_string()
        }
        None => content.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChatModel;

    fn catalogue() -> Vec<(String, String)> {
        vec![(
            "data_science".to_string(),
            "multi-agent analysis of referenced CSV files".to_string(),
        )]
    }

    #[tokio::test]
    async fn empty_catalogue_skips_the_model() {
        let model = Arc::new(MockChatModel::new());
        let planner = Planner::new(model.clone());
        let result = planner
            .route("You are helpful.", "Say hello", &[], &CancellationToken::new())
            .await;
        match result.outcome {
            RouteOutcome::Answer(msg) => {
                assert_eq!(msg.agent_type(), Some("planner_end"));
                assert!(msg.id.is_some());
                assert!(!msg.content.is_empty());
            }
            other => panic!("expected answer, got {other:?}"),
        }
        assert_eq!(model.call_count(), 0);
        assert!(result.captured.is_empty());
        assert_eq!(result.usage, UsageMetadata::default());
    }

    #[tokio::test]
    async fn end_tag_routes_to_answer() {
        let model = Arc::new(MockChatModel::replying([
            "Sure, hi! <subgraph>end</subgraph>",
        ]));
        let planner = Planner::new(model);
        let result = planner
            .route("sys", "Say hello", &catalogue(), &CancellationToken::new())
            .await;
        match result.outcome {
            RouteOutcome::Answer(msg) => {
                assert_eq!(msg.content, "Sure, hi!");
                assert_eq!(msg.agent_type(), Some("planner_end"));
            }
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn known_subgraph_delegates() {
        let model = Arc::new(MockChatModel::replying([
            "<subgraph>data_science</subgraph>",
        ]));
        let planner = Planner::new(model);
        let result = planner
            .route("sys", "Analyze sales.csv", &catalogue(), &CancellationToken::new())
            .await;
        match result.outcome {
            RouteOutcome::Delegate { subgraph, notice } => {
                assert_eq!(subgraph, "data_science");
                assert_eq!(notice.agent_type(), Some("planner_subgraph_data_science"));
            }
            other => panic!("expected delegate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subgraph_prefix_is_tolerated() {
        let model = Arc::new(MockChatModel::replying([
            "<subgraph>subgraph_data_science</subgraph>",
        ]));
        let planner = Planner::new(model);
        let result = planner
            .route("sys", "Analyze", &catalogue(), &CancellationToken::new())
            .await;
        assert!(matches!(result.outcome, RouteOutcome::Delegate { .. }));
    }

    #[tokio::test]
    async fn unknown_subgraph_terminates_with_error() {
        let model = Arc::new(MockChatModel::replying(["<subgraph>x</subgraph>"]));
        let planner = Planner::new(model);
        let result = planner
            .route("sys", "do the x thing", &catalogue(), &CancellationToken::new())
            .await;
        match result.outcome {
            RouteOutcome::Unavailable(msg) => {
                assert_eq!(
                    msg.content,
                    "I am not able to route to the x subgraph as it is not available"
                );
                assert_eq!(msg.error_type(), Some("non_existent_subgraph"));
                assert_eq!(msg.agent_type(), Some("planner_end"));
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn captured_messages_carry_planner_identity() {
        let model = Arc::new(MockChatModel::replying(["hi <subgraph>end</subgraph>"]));
        let planner = Planner::new(model);
        let result = planner
            .route("sys", "hello", &catalogue(), &CancellationToken::new())
            .await;
        assert!(!result.captured.is_empty());
        assert!(result
            .captured
            .iter()
            .all(|m| m.agent_type() == Some("planner")));
        assert!(result.usage.total_tokens > 0);
    }
}
