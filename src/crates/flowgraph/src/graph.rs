//! Graph structure: nodes, edges, and the builder API.
//!
//! A graph is a set of named async nodes joined by direct or conditional
//! edges, plus a [`StateSchema`] describing how node outputs fold into state.
//! [`Graph::compile`] validates the structure and produces a
//! [`CompiledGraph`](crate::engine::CompiledGraph) ready to run.
//!
//! ```rust,ignore
//! let mut graph = Graph::new(schema);
//! graph.add_node("plan", plan_executor);
//! graph.add_node("act", act_executor);
//! graph.add_edge(START, "plan");
//! graph.add_conditional_edge("plan", router, branches);
//! graph.add_edge("act", END);
//! let compiled = graph.compile()?;
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::error::{GraphError, Result};
use crate::state::StateSchema;

/// Node identifier, unique within a graph.
pub type NodeId = String;

/// Synthetic entry node.
pub const START: &str = "__start__";

/// Synthetic terminal node.
pub const END: &str = "__end__";

/// What a node hands back to the engine.
pub enum NodeOutput {
    /// Partial state update; each field folds through its reducer.
    Update(Value),
    /// State update plus an explicit routing decision.
    Command(Command),
    /// Suspend the run and surface this payload to the user. The node is
    /// re-entered on resume with the user's reply in
    /// [`NodeContext::resume_input`].
    Interrupt(Value),
}

impl NodeOutput {
    pub fn update(value: Value) -> Self {
        NodeOutput::Update(value)
    }
}

/// Per-invocation context handed to every node.
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: String,
    /// Checked at every suspension point; fire means the run is over.
    pub cancel: CancellationToken,
    /// Present only when this node is being re-entered after an interrupt:
    /// the user input that answers the interrupt.
    pub resume_input: Option<Value>,
}

impl NodeContext {
    pub fn new(run_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.into(),
            cancel,
            resume_input: None,
        }
    }
}

pub type NodeFuture = Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send>>;

/// Async node body: `(state, context) -> NodeOutput`.
pub type NodeExecutor = Arc<dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync>;

/// Router for conditional edges; evaluated on committed state.
pub type EdgeRouter = Arc<dyn Fn(&Value) -> NodeId + Send + Sync>;

pub struct NodeSpec {
    pub name: NodeId,
    pub executor: NodeExecutor,
}

/// Transition out of a node.
#[derive(Clone)]
pub enum Edge {
    Direct(NodeId),
    Conditional {
        router: EdgeRouter,
        /// Every node the router may return, for validation.
        branches: HashMap<String, NodeId>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<fn>")
                .field("branches", branches)
                .finish(),
        }
    }
}

/// Graph under construction.
pub struct Graph {
    pub(crate) nodes: HashMap<NodeId, NodeSpec>,
    pub(crate) edges: HashMap<NodeId, Edge>,
    pub(crate) schema: StateSchema,
}

impl Graph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            schema,
        }
    }

    pub fn add_node(&mut self, name: impl Into<String>, executor: NodeExecutor) {
        let name = name.into();
        self.nodes.insert(
            name.clone(),
            NodeSpec {
                name,
                executor,
            },
        );
    }

    /// Unconditional edge `from -> to`. One outgoing edge per node; a second
    /// call replaces the first.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
    }

    pub fn add_conditional_edge(
        &mut self,
        from: impl Into<String>,
        router: EdgeRouter,
        branches: HashMap<String, NodeId>,
    ) {
        self.edges
            .insert(from.into(), Edge::Conditional { router, branches });
    }

    /// Reject dangling edge targets and a missing entry edge.
    pub fn validate(&self) -> Result<()> {
        if !self.edges.contains_key(START) {
            return Err(GraphError::InvalidGraph(
                "graph has no edge out of __start__".to_string(),
            ));
        }
        let known = |id: &str| id == END || self.nodes.contains_key(id);
        for (from, edge) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(GraphError::InvalidGraph(format!(
                    "edge from unknown node '{from}'"
                )));
            }
            match edge {
                Edge::Direct(to) => {
                    if !known(to) {
                        return Err(GraphError::InvalidGraph(format!(
                            "edge '{from}' -> unknown node '{to}'"
                        )));
                    }
                }
                Edge::Conditional { branches, .. } => {
                    for to in branches.values() {
                        if !known(to) {
                            return Err(GraphError::InvalidGraph(format!(
                                "conditional edge '{from}' -> unknown node '{to}'"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn compile(self) -> Result<crate::engine::CompiledGraph> {
        self.validate()?;
        Ok(crate::engine::CompiledGraph::new(self))
    }
}

/// Box an async closure into a [`NodeExecutor`].
pub fn node_fn<F, Fut>(f: F) -> NodeExecutor
where
    F: Fn(Value, NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeOutput>> + Send + 'static,
{
    Arc::new(move |state, ctx| Box::pin(f(state, ctx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> NodeExecutor {
        node_fn(|_state, _ctx| async { Ok(NodeOutput::Update(json!({}))) })
    }

    #[test]
    fn validate_requires_entry_edge() {
        let graph = Graph::new(StateSchema::new());
        assert!(matches!(
            graph.validate(),
            Err(GraphError::InvalidGraph(_))
        ));
    }

    #[test]
    fn validate_rejects_dangling_target() {
        let mut graph = Graph::new(StateSchema::new());
        graph.add_node("a", noop());
        graph.add_edge(START, "a");
        graph.add_edge("a", "missing");
        assert!(graph.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_graph() {
        let mut graph = Graph::new(StateSchema::new());
        graph.add_node("a", noop());
        graph.add_edge(START, "a");
        graph.add_edge("a", END);
        assert!(graph.validate().is_ok());
    }
}
