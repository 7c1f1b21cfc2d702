//! Agent-layer errors.
//!
//! Most agent failures never surface here: the runtime converts them into
//! tagged error messages that flow through graph state (the routers decide
//! what happens next). This type covers the few conditions callers must
//! distinguish programmatically.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The model's output never parsed, even after the fixing loop.
    #[error("structured output of '{agent}' unparseable after {attempts} attempts")]
    Unparseable { agent: String, attempts: usize },

    #[error("model error in '{agent}': {error}")]
    Model { agent: String, error: String },

    #[error("agent '{agent}' cancelled")]
    Cancelled { agent: String },
}

pub type Result<T> = std::result::Result<T, AgentError>;
