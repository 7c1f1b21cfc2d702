//! In-memory backend: tests and single-node development.

use async_trait::async_trait;
use dashmap::DashMap;
use flowgraph::Message;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::traits::KvStore;
use crate::types::{ExportStatus, FileHandle, SessionMeta};

#[derive(Default)]
pub struct MemoryStore {
    /// conv key -> ordered (msg_id, message) pairs
    messages: DashMap<String, Vec<(String, Message)>>,
    /// conv key -> seen message ids (dedup gate)
    seen: DashMap<String, std::collections::HashSet<String>>,
    files: DashMap<String, (FileHandle, Vec<u8>)>,
    file_index: DashMap<String, Vec<String>>,
    sessions: DashMap<String, SessionMeta>,
    runs: DashMap<String, Value>,
    shares: DashMap<String, (String, String)>,
    export_status: DashMap<String, ExportStatus>,
    export_bundles: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn conv_key(user: &str, conv: &str) -> String {
        format!("{user}:{conv}")
    }

    fn file_key(user: &str, file_id: &str) -> String {
        format!("{user}:{file_id}")
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put_message(&self, user: &str, conv: &str, message: &Message) -> Result<()> {
        let id = message
            .id
            .clone()
            .ok_or_else(|| StoreError::PermanentIo("message without id".to_string()))?;
        let key = Self::conv_key(user, conv);
        let mut entry = self.messages.entry(key).or_default();
        // idempotent on message id
        if let Some(existing) = entry.iter_mut().find(|(mid, _)| *mid == id) {
            existing.1 = message.clone();
        } else {
            entry.push((id, message.clone()));
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        user: &str,
        conv: &str,
        after: Option<&str>,
    ) -> Result<Vec<Message>> {
        let key = Self::conv_key(user, conv);
        let all = self
            .messages
            .get(&key)
            .map(|e| e.clone())
            .unwrap_or_default();
        let start = match after {
            Some(after_id) => all
                .iter()
                .position(|(id, _)| id == after_id)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };
        Ok(all[start..].iter().map(|(_, m)| m.clone()).collect())
    }

    async fn is_message_new(&self, user: &str, conv: &str, msg_id: &str) -> Result<bool> {
        let key = Self::conv_key(user, conv);
        let mut seen = self.seen.entry(key).or_default();
        Ok(seen.insert(msg_id.to_string()))
    }

    async fn list_conversations(&self, user: &str) -> Result<Vec<String>> {
        let prefix = format!("{user}:");
        let mut convs: Vec<String> = self
            .messages
            .iter()
            .filter_map(|e| e.key().strip_prefix(&prefix).map(str::to_string))
            .collect();
        convs.sort();
        Ok(convs)
    }

    async fn delete_conversation(&self, user: &str, conv: &str) -> Result<()> {
        let key = Self::conv_key(user, conv);
        self.messages.remove(&key);
        self.seen.remove(&key);
        Ok(())
    }

    async fn put_file(&self, user: &str, handle: &FileHandle, bytes: &[u8]) -> Result<()> {
        let key = Self::file_key(user, &handle.file_id);
        self.files.insert(key, (handle.clone(), bytes.to_vec()));
        let mut index = self.file_index.entry(user.to_string()).or_default();
        if !index.contains(&handle.file_id) {
            index.push(handle.file_id.clone());
        }
        Ok(())
    }

    async fn get_file(&self, user: &str, file_id: &str) -> Result<(FileHandle, Vec<u8>)> {
        self.files
            .get(&Self::file_key(user, file_id))
            .map(|e| e.clone())
            .ok_or_else(|| StoreError::NotFound(format!("file {file_id}")))
    }

    async fn delete_file(&self, user: &str, file_id: &str) -> Result<()> {
        self.files.remove(&Self::file_key(user, file_id));
        if let Some(mut index) = self.file_index.get_mut(user) {
            index.retain(|id| id != file_id);
        }
        Ok(())
    }

    async fn list_user_files(&self, user: &str) -> Result<Vec<FileHandle>> {
        let ids = self
            .file_index
            .get(user)
            .map(|e| e.clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.files.get(&Self::file_key(user, id)))
            .map(|e| e.0.clone())
            .collect())
    }

    async fn update_file_meta(&self, user: &str, handle: &FileHandle) -> Result<()> {
        let key = Self::file_key(user, &handle.file_id);
        match self.files.get_mut(&key) {
            Some(mut entry) => {
                entry.0 = handle.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("file {}", handle.file_id))),
        }
    }

    async fn put_session_meta(&self, user: &str, conv: &str, meta: &SessionMeta) -> Result<()> {
        self.sessions
            .insert(Self::conv_key(user, conv), meta.clone());
        Ok(())
    }

    async fn get_session_meta(&self, user: &str, conv: &str) -> Result<Option<SessionMeta>> {
        Ok(self
            .sessions
            .get(&Self::conv_key(user, conv))
            .map(|e| e.clone()))
    }

    async fn put_run_snapshot(&self, run_id: &str, snapshot: &Value) -> Result<()> {
        self.runs.insert(run_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn take_run_snapshot(&self, run_id: &str) -> Result<Option<Value>> {
        Ok(self.runs.remove(run_id).map(|(_, v)| v))
    }

    async fn put_share_token(&self, token: &str, user: &str, conv: &str) -> Result<()> {
        self.shares
            .insert(token.to_string(), (user.to_string(), conv.to_string()));
        Ok(())
    }

    async fn get_share_scope(&self, token: &str) -> Result<Option<(String, String)>> {
        Ok(self.shares.get(token).map(|e| e.clone()))
    }

    async fn put_export_bundle(&self, user: &str, bytes: &[u8]) -> Result<()> {
        self.export_bundles.insert(user.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get_export_bundle(&self, user: &str) -> Result<Vec<u8>> {
        self.export_bundles
            .get(user)
            .map(|e| e.clone())
            .ok_or_else(|| StoreError::NotFound("export bundle".to_string()))
    }

    async fn set_export_status(&self, user: &str, status: &ExportStatus) -> Result<()> {
        self.export_status.insert(user.to_string(), status.clone());
        Ok(())
    }

    async fn get_export_status(&self, user: &str) -> Result<ExportStatus> {
        Ok(self
            .export_status
            .get(user)
            .map(|e| e.clone())
            .unwrap_or_default())
    }

    async fn clear_export(&self, user: &str) -> Result<()> {
        self.export_status.remove(user);
        self.export_bundles.remove(user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn handle(id: &str, mime: &str) -> FileHandle {
        FileHandle {
            file_id: id.to_string(),
            filename: format!("{id}.bin"),
            mime: mime.to_string(),
            size: 3,
            indexed: false,
            uploaded_at: Utc::now(),
            source: "upload".to_string(),
            vector_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn message_dedup_gate_fires_once() {
        let store = MemoryStore::new();
        assert!(store.is_message_new("u", "c", "m1").await.unwrap());
        assert!(!store.is_message_new("u", "c", "m1").await.unwrap());
        // distinct conversation, same id: independent gate
        assert!(store.is_message_new("u", "c2", "m1").await.unwrap());
    }

    #[tokio::test]
    async fn put_message_is_idempotent_on_id() {
        let store = MemoryStore::new();
        let m = Message::ai("one").with_id("m1");
        store.put_message("u", "c", &m).await.unwrap();
        store
            .put_message("u", "c", &Message::ai("two").with_id("m1"))
            .await
            .unwrap();
        let all = store.list_messages("u", "c", None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "two");
    }

    #[tokio::test]
    async fn list_messages_after_cursor() {
        let store = MemoryStore::new();
        for id in ["m1", "m2", "m3"] {
            store
                .put_message("u", "c", &Message::ai(id).with_id(id))
                .await
                .unwrap();
        }
        let tail = store.list_messages("u", "c", Some("m1")).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "m2");
    }

    #[tokio::test]
    async fn file_round_trip_preserves_bytes() {
        let store = MemoryStore::new();
        let h = handle("f1", "text/csv");
        store.put_file("u", &h, b"a,b\n1,2").await.unwrap();
        let (got, bytes) = store.get_file("u", "f1").await.unwrap();
        assert_eq!(got, h);
        assert_eq!(bytes, b"a,b\n1,2");
    }

    #[tokio::test]
    async fn delete_file_removes_from_index() {
        let store = MemoryStore::new();
        store.put_file("u", &handle("f1", "text/csv"), b"x").await.unwrap();
        store.put_file("u", &handle("f2", "text/plain"), b"y").await.unwrap();
        store.delete_file("u", "f1").await.unwrap();
        let files = store.list_user_files("u").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "f2");
        assert!(store.get_file("u", "f1").await.is_err());
    }

    #[tokio::test]
    async fn run_snapshot_take_consumes() {
        let store = MemoryStore::new();
        store
            .put_run_snapshot("r1", &serde_json::json!({"paused_at": "ask"}))
            .await
            .unwrap();
        assert!(store.take_run_snapshot("r1").await.unwrap().is_some());
        assert!(store.take_run_snapshot("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn export_status_defaults_to_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get_export_status("u").await.unwrap(), ExportStatus::None);
        store
            .set_export_status("u", &ExportStatus::Processing)
            .await
            .unwrap();
        assert_eq!(
            store.get_export_status("u").await.unwrap(),
            ExportStatus::Processing
        );
        store.clear_export("u").await.unwrap();
        assert_eq!(store.get_export_status("u").await.unwrap(), ExportStatus::None);
    }
}
