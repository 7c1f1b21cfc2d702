//! The KV/blob adapter contract.

use async_trait::async_trait;
use flowgraph::Message;
use serde_json::Value;

use crate::error::Result;
use crate::types::{ExportStatus, FileHandle, SessionMeta};

/// Typed access to the durable key/value backend.
///
/// All keys are user-scoped (see [`crate::types::keys`]). Writes are
/// idempotent on message id; [`is_message_new`](KvStore::is_message_new) is
/// the canonical dedup gate for fan-out to clients.
#[async_trait]
pub trait KvStore: Send + Sync {
    // --- messages ---

    async fn put_message(&self, user: &str, conv: &str, message: &Message) -> Result<()>;

    /// Messages in insertion order, optionally only those after `after`
    /// (exclusive).
    async fn list_messages(
        &self,
        user: &str,
        conv: &str,
        after: Option<&str>,
    ) -> Result<Vec<Message>>;

    /// Atomic check-and-set: true exactly once per `(conv, msg_id)`.
    async fn is_message_new(&self, user: &str, conv: &str, msg_id: &str) -> Result<bool>;

    /// Conversations this user has messages in.
    async fn list_conversations(&self, user: &str) -> Result<Vec<String>>;

    /// Drop a conversation's messages and dedup state (the chat-deletion
    /// cascade).
    async fn delete_conversation(&self, user: &str, conv: &str) -> Result<()>;

    // --- files ---

    async fn put_file(&self, user: &str, handle: &FileHandle, bytes: &[u8]) -> Result<()>;

    async fn get_file(&self, user: &str, file_id: &str) -> Result<(FileHandle, Vec<u8>)>;

    async fn delete_file(&self, user: &str, file_id: &str) -> Result<()>;

    async fn list_user_files(&self, user: &str) -> Result<Vec<FileHandle>>;

    /// Update a handle's metadata (indexing completion, vector ids) without
    /// touching the bytes.
    async fn update_file_meta(&self, user: &str, handle: &FileHandle) -> Result<()>;

    // --- sessions ---

    async fn put_session_meta(&self, user: &str, conv: &str, meta: &SessionMeta) -> Result<()>;

    async fn get_session_meta(&self, user: &str, conv: &str) -> Result<Option<SessionMeta>>;

    // --- run snapshots (interrupt persistence) ---

    async fn put_run_snapshot(&self, run_id: &str, snapshot: &Value) -> Result<()>;

    /// Removes and returns the snapshot; a run resumes at most once per
    /// pause.
    async fn take_run_snapshot(&self, run_id: &str) -> Result<Option<Value>>;

    // --- share tokens ---

    async fn put_share_token(&self, token: &str, user: &str, conv: &str) -> Result<()>;

    /// Resolve a share token to the `(user, conversation)` it scopes.
    async fn get_share_scope(&self, token: &str) -> Result<Option<(String, String)>>;

    // --- export ---

    async fn put_export_bundle(&self, user: &str, bytes: &[u8]) -> Result<()>;

    async fn get_export_bundle(&self, user: &str) -> Result<Vec<u8>>;

    async fn set_export_status(&self, user: &str, status: &ExportStatus) -> Result<()>;

    async fn get_export_status(&self, user: &str) -> Result<ExportStatus>;

    async fn clear_export(&self, user: &str) -> Result<()>;
}
