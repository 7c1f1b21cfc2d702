//! Configuration-time errors. Call-time errors are
//! [`flowgraph::LlmError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmConfigError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("no model configured for role '{role}' and no default")]
    NoModel { role: String },
}

pub type Result<T> = std::result::Result<T, LlmConfigError>;
