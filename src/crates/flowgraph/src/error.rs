//! Error types for graph construction and execution.

use thiserror::Error;

use crate::interrupt::InterruptSnapshot;

/// Errors raised by the graph engine.
///
/// Only the *fatal* conditions of a run surface through this type: an edge
/// pointing at a node that does not exist, a reducer rejecting an update, a
/// node exceeding its deadline, or the run being cancelled. Recoverable
/// failures (tool errors, model parse failures, sandbox outages) are turned
/// into in-band messages by the layers above and never reach here.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A routing decision named a node that is not part of the graph.
    #[error("unknown node '{node}' (routed from '{from}')")]
    UnknownNode { node: String, from: String },

    /// Graph structure failed validation before compilation.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A node executor returned an error the run cannot absorb.
    #[error("node '{node}' failed: {error}")]
    NodeExecution { node: String, error: String },

    /// A reducer rejected a state update.
    #[error("state error in '{field}': {error}")]
    State { field: String, error: String },

    /// A node exceeded its execution deadline.
    #[error("node '{node}' timed out after {timeout_secs}s")]
    NodeTimeout { node: String, timeout_secs: u64 },

    /// The run's cancellation token fired.
    #[error("run cancelled")]
    Cancelled,

    /// The superstep bound was exceeded without reaching END.
    #[error("run exceeded {0} supersteps without terminating")]
    StepLimit(usize),

    /// Persisting or loading an interrupt snapshot failed.
    #[error("interrupt snapshot error: {0}")]
    Snapshot(String),

    /// A node raised an interrupt; carried internally so the engine can
    /// suspend. Callers receive it as [`RunOutcome::Interrupted`]
    /// instead.
    ///
    /// [`RunOutcome::Interrupted`]: crate::engine::RunOutcome::Interrupted
    #[error("interrupted at node '{}'", .0.paused_at)]
    Interrupted(InterruptSnapshot),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
