//! Per-session sandbox bindings.
//!
//! Keyed by `(user_id, conversation_id)`. Creation goes through the map's
//! per-key entry lock, so concurrent requests in one session share a single
//! binding; `cleanup` tears the remote sandbox down and drops the entry.

use dashmap::DashMap;
use std::sync::Arc;
use store::KvStore;

use crate::client::SandboxClient;
use crate::error::Result;
use crate::persistent::{PersistentSandbox, SandboxLimits};

pub type SessionKey = (String, String);

pub struct SandboxManager {
    bindings: DashMap<SessionKey, Arc<PersistentSandbox>>,
    client: Arc<dyn SandboxClient>,
    store: Arc<dyn KvStore>,
    limits: SandboxLimits,
}

impl SandboxManager {
    pub fn new(
        client: Arc<dyn SandboxClient>,
        store: Arc<dyn KvStore>,
        limits: SandboxLimits,
    ) -> Self {
        Self {
            bindings: DashMap::new(),
            client,
            store,
            limits,
        }
    }

    /// The binding for this session, constructed lazily. Construction is
    /// cheap; the remote sandbox is only provisioned on the first operation.
    pub fn get_or_create(
        &self,
        user_id: &str,
        conversation_id: &str,
        snapshot: &str,
        seed_file_ids: Vec<String>,
    ) -> Arc<PersistentSandbox> {
        let key = (user_id.to_string(), conversation_id.to_string());
        self.bindings
            .entry(key)
            .or_insert_with(|| {
                Arc::new(PersistentSandbox::new(
                    user_id,
                    snapshot,
                    seed_file_ids,
                    Arc::clone(&self.client),
                    Arc::clone(&self.store),
                    self.limits.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, user_id: &str, conversation_id: &str) -> Option<Arc<PersistentSandbox>> {
        self.bindings
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .map(|e| e.clone())
    }

    pub fn has_binding(&self, user_id: &str, conversation_id: &str) -> bool {
        self.bindings
            .contains_key(&(user_id.to_string(), conversation_id.to_string()))
    }

    /// Destroy the session's sandbox, if any, and drop the binding.
    pub async fn cleanup(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let key = (user_id.to_string(), conversation_id.to_string());
        if let Some((_, sandbox)) = self.bindings.remove(&key) {
            sandbox.cleanup().await?;
        }
        Ok(())
    }

    pub fn active_bindings(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSandboxClient;
    use store::MemoryStore;

    fn manager() -> (SandboxManager, Arc<MockSandboxClient>) {
        let client = Arc::new(MockSandboxClient::new());
        let mgr = SandboxManager::new(
            client.clone(),
            Arc::new(MemoryStore::new()),
            SandboxLimits::default(),
        );
        (mgr, client)
    }

    #[tokio::test]
    async fn one_binding_per_session() {
        let (mgr, client) = manager();
        let a = mgr.get_or_create("u", "c", "img", vec![]);
        let b = mgr.get_or_create("u", "c", "img", vec![]);
        assert!(Arc::ptr_eq(&a, &b));

        a.ensure().await.unwrap();
        b.ensure().await.unwrap();
        assert_eq!(client.created_count(), 1);
    }

    #[tokio::test]
    async fn distinct_sessions_get_distinct_bindings() {
        let (mgr, _client) = manager();
        let a = mgr.get_or_create("u", "c1", "img", vec![]);
        let b = mgr.get_or_create("u", "c2", "img", vec![]);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(mgr.active_bindings(), 2);
    }

    #[tokio::test]
    async fn cleanup_destroys_and_drops() {
        let (mgr, client) = manager();
        let sandbox = mgr.get_or_create("u", "c", "img", vec![]);
        let id = sandbox.ensure().await.unwrap();

        mgr.cleanup("u", "c").await.unwrap();
        assert!(!mgr.has_binding("u", "c"));
        assert!(client.is_destroyed(&id));
    }
}
