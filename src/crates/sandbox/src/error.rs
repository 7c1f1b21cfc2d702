//! Sandbox error taxonomy.
//!
//! `UserCodeError` is data, not failure: broken user code comes back as a
//! payload the agent reads and reacts to. The other variants describe the
//! sandbox service itself and feed the outage handling in the data-science
//! pipeline (one retry, then short-circuit).

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SandboxError {
    /// Service unreachable or refusing connections.
    #[error("sandbox service unavailable: {0}")]
    Unavailable(String),

    #[error("sandbox operation timed out after {0}s")]
    Timeout(u64),

    #[error("sandbox quota exceeded")]
    QuotaExceeded,

    /// The sandbox id no longer resolves (expired, externally destroyed).
    #[error("sandbox gone")]
    SandboxGone,

    /// The user's code failed inside the sandbox; the payload is surfaced
    /// verbatim to the calling agent.
    #[error("{0}")]
    UserCodeError(String),

    #[error("sandbox operation cancelled")]
    Cancelled,
}

impl SandboxError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SandboxError::Unavailable(_) | SandboxError::Timeout(_))
    }

    /// Outage classes that trigger the pipeline's short-circuit handling.
    pub fn is_outage(&self) -> bool {
        matches!(self, SandboxError::Unavailable(_) | SandboxError::SandboxGone)
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
