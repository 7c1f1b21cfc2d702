//! Bridges the engine's snapshot persistence onto the KV store.

use async_trait::async_trait;
use flowgraph::{GraphError, InterruptSnapshot, SnapshotStore};
use std::sync::Arc;

use crate::traits::KvStore;

/// Stores interrupt snapshots under `run:<run_id>`.
pub struct KvSnapshotStore {
    store: Arc<dyn KvStore>,
}

impl KvSnapshotStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SnapshotStore for KvSnapshotStore {
    async fn save(&self, snapshot: &InterruptSnapshot) -> flowgraph::Result<()> {
        let value = serde_json::to_value(snapshot)?;
        self.store
            .put_run_snapshot(&snapshot.run_id, &value)
            .await
            .map_err(|e| GraphError::Snapshot(e.to_string()))
    }

    async fn take(&self, run_id: &str) -> flowgraph::Result<Option<InterruptSnapshot>> {
        let value = self
            .store
            .take_run_snapshot(run_id)
            .await
            .map_err(|e| GraphError::Snapshot(e.to_string()))?;
        value
            .map(|v| serde_json::from_value(v).map_err(GraphError::from))
            .transpose()
    }
}
