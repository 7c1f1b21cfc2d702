//! Sequential graph execution.
//!
//! One node at a time, per run: the engine commits each node's update through
//! the state schema, then resolves the outgoing edge on the committed state.
//! Suspension points (node execution, interrupt, cancellation) are explicit;
//! there is no intra-run parallelism here. Nodes that fan out internally
//! (e.g. parallel search) do so inside their own executor.
//!
//! Deadlines: each node call is bounded by [`RunOptions::node_timeout`].
//! Interrupt waits do not count; a paused run holds no task at all, it is a
//! snapshot in the [`SnapshotStore`] until `resume` is called.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeContext, NodeOutput, END, START};
use crate::interrupt::{InterruptSnapshot, SnapshotStore};

/// Per-run execution options.
#[derive(Clone)]
pub struct RunOptions {
    pub run_id: String,
    /// Deadline for a single node call. Default 180 s.
    pub node_timeout: Duration,
    /// Superstep bound guarding against routing livelock. Default 64.
    pub max_steps: usize,
    pub cancel: CancellationToken,
    /// Where interrupt snapshots are persisted. Runs without one still
    /// interrupt, but the snapshot only lives in the returned outcome.
    pub snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl RunOptions {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            node_timeout: Duration::from_secs(180),
            max_steps: 64,
            cancel: CancellationToken::new(),
            snapshots: None,
        }
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }
}

/// How a run ended (fatal errors surface as `Err` instead).
#[derive(Debug)]
pub enum RunOutcome {
    /// Reached END; carries the final state.
    Complete(Value),
    /// A node raised an interrupt; resume with
    /// [`CompiledGraph::resume`].
    Interrupted(InterruptSnapshot),
}

impl RunOutcome {
    pub fn into_state(self) -> Option<Value> {
        match self {
            RunOutcome::Complete(state) => Some(state),
            RunOutcome::Interrupted(_) => None,
        }
    }
}

/// A validated, executable graph.
pub struct CompiledGraph {
    graph: Graph,
}

impl CompiledGraph {
    pub(crate) fn new(graph: Graph) -> Self {
        Self { graph }
    }

    /// Execute from START with `input` as the initial state.
    pub async fn run(&self, input: Value, opts: &RunOptions) -> Result<RunOutcome> {
        let mut state = input;
        let first = self.next_node(START, &state)?;
        self.drive(state.take(), first, None, opts).await
    }

    /// Re-enter a paused run at its interrupt point, injecting `resume_input`
    /// as the interrupt's return value.
    pub async fn resume(
        &self,
        snapshot: InterruptSnapshot,
        resume_input: Value,
        opts: &RunOptions,
    ) -> Result<RunOutcome> {
        self.drive(snapshot.state, snapshot.paused_at, Some(resume_input), opts)
            .await
    }

    async fn drive(
        &self,
        mut state: Value,
        mut current: String,
        mut resume_input: Option<Value>,
        opts: &RunOptions,
    ) -> Result<RunOutcome> {
        for _step in 0..opts.max_steps {
            if current == END {
                return Ok(RunOutcome::Complete(state));
            }
            if opts.cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            let spec = self
                .graph
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::UnknownNode {
                    node: current.clone(),
                    from: "<engine>".to_string(),
                })?;

            tracing::debug!(run_id = %opts.run_id, node = %current, "executing node");

            let ctx = NodeContext {
                run_id: opts.run_id.clone(),
                cancel: opts.cancel.clone(),
                resume_input: resume_input.take(),
            };
            let fut = (spec.executor)(state.clone(), ctx);

            let output = tokio::select! {
                _ = opts.cancel.cancelled() => return Err(GraphError::Cancelled),
                res = tokio::time::timeout(opts.node_timeout, fut) => match res {
                    Ok(output) => output?,
                    Err(_) => {
                        return Err(GraphError::NodeTimeout {
                            node: current.clone(),
                            timeout_secs: opts.node_timeout.as_secs(),
                        })
                    }
                },
            };

            match output {
                NodeOutput::Update(update) => {
                    self.graph.schema.apply(&mut state, &update)?;
                    current = self.next_node(&current, &state)?;
                }
                NodeOutput::Command(cmd) => {
                    if let Some(update) = cmd.update {
                        self.graph.schema.apply(&mut state, &update)?;
                    }
                    current = match cmd.goto {
                        Some(goto) => {
                            self.check_target(&current, &goto)?;
                            goto
                        }
                        None => self.next_node(&current, &state)?,
                    };
                }
                NodeOutput::Interrupt(payload) => {
                    let snapshot = InterruptSnapshot {
                        run_id: opts.run_id.clone(),
                        paused_at: current.clone(),
                        payload,
                        state,
                    };
                    if let Some(store) = &opts.snapshots {
                        store.save(&snapshot).await?;
                    }
                    return Ok(RunOutcome::Interrupted(snapshot));
                }
            }
        }
        Err(GraphError::StepLimit(opts.max_steps))
    }

    /// Resolve the outgoing edge of `from` against committed state.
    fn next_node(&self, from: &str, state: &Value) -> Result<String> {
        let edge = self
            .graph
            .edges
            .get(from)
            .ok_or_else(|| GraphError::InvalidGraph(format!("node '{from}' has no outgoing edge")))?;
        let target = match edge {
            Edge::Direct(to) => to.clone(),
            Edge::Conditional { router, .. } => router(state),
        };
        self.check_target(from, &target)?;
        Ok(target)
    }

    fn check_target(&self, from: &str, target: &str) -> Result<()> {
        if target != END && !self.graph.nodes.contains_key(target) {
            return Err(GraphError::UnknownNode {
                node: target.to_string(),
                from: from.to_string(),
            });
        }
        Ok(())
    }
}
