//! flowgraph: typed-state graph execution for manta workflows.
//!
//! The crate provides the orchestration substrate the rest of the workspace
//! builds on:
//!
//! - [`state`]: JSON state under per-field reducers
//! - [`messages`]: the message model shared with the streaming layer
//! - [`graph`] / [`engine`]: graph construction and sequential execution
//! - [`command`]: node-driven routing
//! - [`interrupt`]: human-in-the-loop suspension and resume
//! - [`tool`]: the uniform tool invocation layer
//! - [`llm`]: the provider-agnostic chat model contract
//! - [`registry`]: the subgraph catalogue the planner routes over
//! - [`retry`]: backoff for transient store/sandbox/model failures

pub mod command;
pub mod engine;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod llm;
pub mod messages;
pub mod registry;
pub mod retry;
pub mod state;
pub mod tool;

pub use command::Command;
pub use engine::{CompiledGraph, RunOptions, RunOutcome};
pub use error::{GraphError, Result};
pub use graph::{node_fn, EdgeRouter, Graph, NodeContext, NodeExecutor, NodeOutput, END, START};
pub use interrupt::{InterruptSnapshot, MemorySnapshotStore, SnapshotStore};
pub use llm::{ChatModel, ChatRequest, ChatResponse, LlmError, ToolDefinition, UsageMetadata};
pub use messages::{Message, MessageRole, ToolCall};
pub use registry::{SubgraphOutcome, SubgraphRegistry, SubgraphRequest, SubgraphSpec};
pub use retry::RetryPolicy;
pub use state::{AppendReducer, ConcatReducer, OverwriteReducer, Reducer, StateSchema, SumReducer};
pub use tool::{tool_fn, ParamSpec, Tool, ToolError, ToolRegistry};
