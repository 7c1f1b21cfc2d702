//! Human-in-the-loop suspension.
//!
//! A node raises an interrupt by returning
//! [`NodeOutput::Interrupt`](crate::graph::NodeOutput::Interrupt) with a
//! payload for the user. The engine freezes the run into an
//! [`InterruptSnapshot`], persists it through a [`SnapshotStore`], and hands
//! control back to the caller. `resume` re-enters the paused node with the
//! user's reply injected as the interrupt's return value, so the node body
//! reads as straight-line code:
//!
//! ```rust,ignore
//! node_fn(|state, ctx| async move {
//!     let reply = match ctx.resume_input {
//!         Some(input) => input,
//!         None => return Ok(NodeOutput::Interrupt(json!({"question": "..."}))),
//!     };
//!     // classify reply, update state
//! })
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

/// Frozen run state while awaiting user input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptSnapshot {
    pub run_id: String,
    /// Node to re-enter on resume.
    pub paused_at: String,
    /// Payload surfaced to the user (question, proposal, ...).
    pub payload: Value,
    /// Committed state at the moment of suspension.
    pub state: Value,
}

/// Durable home for interrupt snapshots, keyed by run id.
///
/// `take` removes the snapshot: a run id resumes at most once per pause.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &InterruptSnapshot) -> Result<()>;
    async fn take(&self, run_id: &str) -> Result<Option<InterruptSnapshot>>;
}

/// In-process snapshot store for tests and single-node runs.
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<HashMap<String, InterruptSnapshot>>,
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &InterruptSnapshot) -> Result<()> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn take(&self, run_id: &str) -> Result<Option<InterruptSnapshot>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.remove(run_id))
    }
}
