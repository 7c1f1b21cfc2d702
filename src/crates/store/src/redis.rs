//! Redis backend over a multiplexed connection manager.
//!
//! Key layout per [`crate::types::keys`]. The dedup gate rides on `SADD`
//! (one round trip, atomic). Message order is kept in an index list per
//! conversation because the message keys themselves are unordered.

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use flowgraph::Message;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::traits::KvStore;
use crate::types::{keys, ExportStatus, FileHandle, SessionMeta};

pub struct RedisStore {
    con: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StoreError::PermanentIo(format!("bad redis url: {e}")))?;
        let con = ConnectionManager::new(client)
            .await
            .map_err(StoreError::from)?;
        Ok(Self { con })
    }

    fn seen_key(user: &str, conv: &str) -> String {
        format!("seen:{user}:{conv}")
    }

    fn file_data_key(user: &str, file_id: &str) -> String {
        format!("{}:data", keys::file(user, file_id))
    }

    fn export_data_key(user: &str) -> String {
        format!("{}:data", keys::export(user))
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn put_message(&self, user: &str, conv: &str, message: &Message) -> Result<()> {
        let id = message
            .id
            .clone()
            .ok_or_else(|| StoreError::PermanentIo("message without id".to_string()))?;
        let mut con = self.con.clone();
        let key = keys::message(user, conv, &id);
        let body = serde_json::to_string(message)?;
        let existed: bool = con.exists(&key).await.map_err(StoreError::from)?;
        con.set::<_, _, ()>(&key, body).await.map_err(StoreError::from)?;
        if !existed {
            con.rpush::<_, _, ()>(keys::message_index(user, conv), &id)
                .await
                .map_err(StoreError::from)?;
            con.sadd::<_, _, ()>(format!("convs:{user}"), conv)
                .await
                .map_err(StoreError::from)?;
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        user: &str,
        conv: &str,
        after: Option<&str>,
    ) -> Result<Vec<Message>> {
        let mut con = self.con.clone();
        let ids: Vec<String> = con
            .lrange(keys::message_index(user, conv), 0, -1)
            .await
            .map_err(StoreError::from)?;
        let start = match after {
            Some(after_id) => ids
                .iter()
                .position(|id| id == after_id)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };
        let mut out = Vec::with_capacity(ids.len().saturating_sub(start));
        for id in &ids[start..] {
            let body: Option<String> = con
                .get(keys::message(user, conv, id))
                .await
                .map_err(StoreError::from)?;
            if let Some(body) = body {
                out.push(serde_json::from_str(&body)?);
            }
        }
        Ok(out)
    }

    async fn is_message_new(&self, user: &str, conv: &str, msg_id: &str) -> Result<bool> {
        let mut con = self.con.clone();
        let added: i64 = con
            .sadd(Self::seen_key(user, conv), msg_id)
            .await
            .map_err(StoreError::from)?;
        Ok(added == 1)
    }

    async fn list_conversations(&self, user: &str) -> Result<Vec<String>> {
        let mut con = self.con.clone();
        let mut convs: Vec<String> = con
            .smembers(format!("convs:{user}"))
            .await
            .map_err(StoreError::from)?;
        convs.sort();
        Ok(convs)
    }

    async fn delete_conversation(&self, user: &str, conv: &str) -> Result<()> {
        let mut con = self.con.clone();
        let ids: Vec<String> = con
            .lrange(keys::message_index(user, conv), 0, -1)
            .await
            .map_err(StoreError::from)?;
        for id in ids {
            con.del::<_, ()>(keys::message(user, conv, &id))
                .await
                .map_err(StoreError::from)?;
        }
        con.del::<_, ()>(keys::message_index(user, conv))
            .await
            .map_err(StoreError::from)?;
        con.del::<_, ()>(Self::seen_key(user, conv))
            .await
            .map_err(StoreError::from)?;
        con.srem::<_, _, ()>(format!("convs:{user}"), conv)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn put_file(&self, user: &str, handle: &FileHandle, bytes: &[u8]) -> Result<()> {
        let mut con = self.con.clone();
        con.set::<_, _, ()>(keys::file(user, &handle.file_id), serde_json::to_string(handle)?)
            .await
            .map_err(StoreError::from)?;
        con.set::<_, _, ()>(Self::file_data_key(user, &handle.file_id), bytes)
            .await
            .map_err(StoreError::from)?;
        con.sadd::<_, _, ()>(keys::file_index(user), &handle.file_id)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_file(&self, user: &str, file_id: &str) -> Result<(FileHandle, Vec<u8>)> {
        let mut con = self.con.clone();
        let meta: Option<String> = con
            .get(keys::file(user, file_id))
            .await
            .map_err(StoreError::from)?;
        let meta = meta.ok_or_else(|| StoreError::NotFound(format!("file {file_id}")))?;
        let bytes: Vec<u8> = con
            .get(Self::file_data_key(user, file_id))
            .await
            .map_err(StoreError::from)?;
        Ok((serde_json::from_str(&meta)?, bytes))
    }

    async fn delete_file(&self, user: &str, file_id: &str) -> Result<()> {
        let mut con = self.con.clone();
        con.del::<_, ()>(keys::file(user, file_id))
            .await
            .map_err(StoreError::from)?;
        con.del::<_, ()>(Self::file_data_key(user, file_id))
            .await
            .map_err(StoreError::from)?;
        con.srem::<_, _, ()>(keys::file_index(user), file_id)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn list_user_files(&self, user: &str) -> Result<Vec<FileHandle>> {
        let mut con = self.con.clone();
        let ids: Vec<String> = con
            .smembers(keys::file_index(user))
            .await
            .map_err(StoreError::from)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let meta: Option<String> = con
                .get(keys::file(user, &id))
                .await
                .map_err(StoreError::from)?;
            if let Some(meta) = meta {
                out.push(serde_json::from_str(&meta)?);
            }
        }
        Ok(out)
    }

    async fn update_file_meta(&self, user: &str, handle: &FileHandle) -> Result<()> {
        let mut con = self.con.clone();
        let key = keys::file(user, &handle.file_id);
        let exists: bool = con.exists(&key).await.map_err(StoreError::from)?;
        if !exists {
            return Err(StoreError::NotFound(format!("file {}", handle.file_id)));
        }
        con.set::<_, _, ()>(key, serde_json::to_string(handle)?)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn put_session_meta(&self, user: &str, conv: &str, meta: &SessionMeta) -> Result<()> {
        let mut con = self.con.clone();
        con.set::<_, _, ()>(keys::session(user, conv), serde_json::to_string(meta)?)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_session_meta(&self, user: &str, conv: &str) -> Result<Option<SessionMeta>> {
        let mut con = self.con.clone();
        let body: Option<String> = con
            .get(keys::session(user, conv))
            .await
            .map_err(StoreError::from)?;
        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn put_run_snapshot(&self, run_id: &str, snapshot: &Value) -> Result<()> {
        let mut con = self.con.clone();
        con.set::<_, _, ()>(keys::run(run_id), snapshot.to_string())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn take_run_snapshot(&self, run_id: &str) -> Result<Option<Value>> {
        let mut con = self.con.clone();
        let key = keys::run(run_id);
        let body: Option<String> = con.get(&key).await.map_err(StoreError::from)?;
        if body.is_some() {
            con.del::<_, ()>(&key).await.map_err(StoreError::from)?;
        }
        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn put_share_token(&self, token: &str, user: &str, conv: &str) -> Result<()> {
        let mut con = self.con.clone();
        con.set::<_, _, ()>(keys::share_token(token), format!("{user}:{conv}"))
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_share_scope(&self, token: &str) -> Result<Option<(String, String)>> {
        let mut con = self.con.clone();
        let scope: Option<String> = con
            .get(keys::share_token(token))
            .await
            .map_err(StoreError::from)?;
        Ok(scope.and_then(|s| {
            s.split_once(':')
                .map(|(u, c)| (u.to_string(), c.to_string()))
        }))
    }

    async fn put_export_bundle(&self, user: &str, bytes: &[u8]) -> Result<()> {
        let mut con = self.con.clone();
        con.set::<_, _, ()>(Self::export_data_key(user), bytes)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_export_bundle(&self, user: &str) -> Result<Vec<u8>> {
        let mut con = self.con.clone();
        let bytes: Option<Vec<u8>> = con
            .get(Self::export_data_key(user))
            .await
            .map_err(StoreError::from)?;
        bytes.ok_or_else(|| StoreError::NotFound("export bundle".to_string()))
    }

    async fn set_export_status(&self, user: &str, status: &ExportStatus) -> Result<()> {
        let mut con = self.con.clone();
        con.set::<_, _, ()>(keys::export(user), serde_json::to_string(status)?)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_export_status(&self, user: &str) -> Result<ExportStatus> {
        let mut con = self.con.clone();
        let body: Option<String> = con
            .get(keys::export(user))
            .await
            .map_err(StoreError::from)?;
        Ok(match body {
            Some(b) => serde_json::from_str(&b)?,
            None => ExportStatus::None,
        })
    }

    async fn clear_export(&self, user: &str) -> Result<()> {
        let mut con = self.con.clone();
        con.del::<_, ()>(keys::export(user))
            .await
            .map_err(StoreError::from)?;
        con.del::<_, ()>(Self::export_data_key(user))
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}
