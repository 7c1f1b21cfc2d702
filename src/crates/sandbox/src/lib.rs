//! sandbox: remote execution environments bound to manta sessions.
//!
//! [`client`] wraps the external sandbox service; [`persistent`] binds one
//! sandbox to one session with lazy provisioning, file seeding, and output
//! shaping; [`manager`] owns the per-session binding table. The [`testing`]
//! module ships the scripted in-memory client the rest of the workspace
//! tests against.

pub mod client;
pub mod error;
pub mod manager;
pub mod output;
pub mod persistent;
pub mod testing;

pub use client::{EntryInfo, HttpSandboxClient, SandboxClient};
pub use error::{Result, SandboxError};
pub use manager::SandboxManager;
pub use output::shape_output;
pub use persistent::{
    is_outage_payload, OpResult, PersistentSandbox, SandboxLimits, SANDBOX_UNAVAILABLE,
};
