//! agents: the model-facing layer of manta.
//!
//! - [`capture`]: interceptors recording every model call for the live
//!   stream, tagged with the agent identity
//! - [`runtime`]: the agent loop: model, tools, fixing parser
//! - [`structured`]: JSON/tag extraction and repair prompts
//! - [`tools`]: sandbox and search tool surfaces
//! - [`planner`]: the XML router choosing a subgraph per request
//! - [`data_science`]: the eight-role analysis pipeline
//! - [`testing`]: the scripted chat model used across the workspace tests

pub mod capture;
pub mod data_science;
pub mod error;
pub mod planner;
pub mod runtime;
pub mod structured;
pub mod testing;
pub mod tools;

pub use capture::{completions, CaptureBuffer, CaptureInterceptor, StreamKind};
pub use data_science::{
    build_graph as build_data_science_graph, build_subgraph as build_data_science_subgraph,
    classify_feedback, DataScienceDeps, Feedback, PipelineLimits, RoleModels,
};
pub use error::AgentError;
pub use planner::{Planner, RouteOutcome, RouteResult, PLANNER_NAME};
pub use runtime::Agent;
pub use tools::{registry_of, sandbox_tools, search_tools, SearchFn};
