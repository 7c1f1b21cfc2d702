//! Subgraph registry: named graphs behind input/output mappers.
//!
//! Anything that maps a user request into initial state and a final state
//! into one message can be registered as a subgraph and chosen by the
//! planner. The registry is the typed catalogue the planner routes over;
//! which entries a given request sees is decided per request (the
//! data-science subgraph, for example, is only advertised when a CSV is
//! referenced).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::{CompiledGraph, RunOptions, RunOutcome};
use crate::error::Result;
use crate::interrupt::InterruptSnapshot;
use crate::messages::Message;

/// The request surface a subgraph sees.
#[derive(Debug, Clone, Default)]
pub struct SubgraphRequest {
    pub text: String,
    /// Free-form per-request context: `directory_content`, doc ids,
    /// provider, whatever the input mapper wants to read.
    pub context: Value,
}

impl SubgraphRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: Value::Null,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

pub type InputMapper = Arc<dyn Fn(&SubgraphRequest) -> Value + Send + Sync>;
pub type OutputMapper = Arc<dyn Fn(&Value) -> Message + Send + Sync>;

/// What a subgraph invocation produced.
#[derive(Debug)]
pub enum SubgraphOutcome {
    /// Finished; the mapped message, tagged `<name>_end`.
    Message(Message),
    /// Paused awaiting user input.
    Interrupted(InterruptSnapshot),
}

/// A registered subgraph.
pub struct SubgraphSpec {
    pub name: String,
    pub description: String,
    pub graph: Arc<CompiledGraph>,
    pub input_mapper: InputMapper,
    pub output_mapper: OutputMapper,
}

impl SubgraphSpec {
    pub async fn invoke(
        &self,
        request: &SubgraphRequest,
        opts: &RunOptions,
    ) -> Result<SubgraphOutcome> {
        let initial = (self.input_mapper)(request);
        match self.graph.run(initial, opts).await? {
            RunOutcome::Complete(state) => Ok(SubgraphOutcome::Message(self.map_output(&state))),
            RunOutcome::Interrupted(snapshot) => Ok(SubgraphOutcome::Interrupted(snapshot)),
        }
    }

    pub async fn resume(
        &self,
        snapshot: InterruptSnapshot,
        user_input: Value,
        opts: &RunOptions,
    ) -> Result<SubgraphOutcome> {
        match self.graph.resume(snapshot, user_input, opts).await? {
            RunOutcome::Complete(state) => Ok(SubgraphOutcome::Message(self.map_output(&state))),
            RunOutcome::Interrupted(snapshot) => Ok(SubgraphOutcome::Interrupted(snapshot)),
        }
    }

    fn map_output(&self, state: &Value) -> Message {
        let mut message = (self.output_mapper)(state);
        message.ensure_id();
        message
            .additional_kwargs
            .insert(
                crate::messages::KW_AGENT_TYPE.to_string(),
                serde_json::json!(format!("{}_end", self.name)),
            );
        message
    }
}

/// Process-wide catalogue of registered subgraphs.
#[derive(Default, Clone)]
pub struct SubgraphRegistry {
    entries: HashMap<String, Arc<SubgraphSpec>>,
}

impl SubgraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: SubgraphSpec) {
        self.entries.insert(spec.name.clone(), Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<Arc<SubgraphSpec>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// `name: description` lines for the planner prompt, restricted to the
    /// subgraphs advertised for this request.
    pub fn catalogue_for(&self, advertised: &[String]) -> String {
        let mut lines: Vec<String> = advertised
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|spec| format!("subgraph_{}: {}", spec.name, spec.description))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{node_fn, Graph, NodeOutput, END, START};
    use crate::messages::messages_from_state;
    use crate::state::{AppendReducer, StateSchema};
    use serde_json::json;

    fn echo_subgraph() -> SubgraphSpec {
        let mut schema = StateSchema::new();
        schema.add_field("internal_messages", Box::new(AppendReducer));
        let mut graph = Graph::new(schema);
        graph.add_node(
            "echo",
            node_fn(|state, _ctx| async move {
                let text = state["internal_messages"][0]["content"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                Ok(NodeOutput::Update(json!({
                    "internal_messages": [Message::ai(text).with_id("echo-1")]
                })))
            }),
        );
        graph.add_edge(START, "echo");
        graph.add_edge("echo", END);

        SubgraphSpec {
            name: "echo".to_string(),
            description: "repeats the request".to_string(),
            graph: Arc::new(graph.compile().unwrap()),
            input_mapper: Arc::new(|req: &SubgraphRequest| {
                json!({
                    "internal_messages": [Message::human(req.text.clone()).with_id("in-1")]
                })
            }),
            output_mapper: Arc::new(|state: &Value| {
                messages_from_state(state, "internal_messages")
                    .last()
                    .cloned()
                    .unwrap_or_else(|| Message::ai(""))
            }),
        }
    }

    // input mapper then output mapper on a one-node graph preserves content
    #[tokio::test]
    async fn mapper_round_trip_preserves_content() {
        let spec = echo_subgraph();
        let outcome = spec
            .invoke(
                &SubgraphRequest::new("hello there"),
                &RunOptions::new("run-echo"),
            )
            .await
            .unwrap();
        match outcome {
            SubgraphOutcome::Message(msg) => {
                assert_eq!(msg.content, "hello there");
                assert_eq!(msg.agent_type(), Some("echo_end"));
                assert!(msg.id.is_some());
            }
            SubgraphOutcome::Interrupted(_) => panic!("unexpected interrupt"),
        }
    }

    #[test]
    fn catalogue_lists_only_advertised() {
        let mut registry = SubgraphRegistry::new();
        registry.register(echo_subgraph());
        let all = registry.catalogue_for(&["echo".to_string()]);
        assert!(all.contains("subgraph_echo"));
        let none = registry.catalogue_for(&[]);
        assert!(none.is_empty());
    }
}
