//! User data export: bundle on demand, expire after a day.
//!
//! `request_export` flips the status to `Processing` and spawns the bundling
//! task; the bundle is a gzipped JSON document holding the user's
//! conversations, messages, and file metadata. Status walks
//! `None -> Processing -> Ready -> None`; `Ready` bundles older than the TTL
//! are cleared by [`ExportService::sweep_expired`].

use chrono::{Duration as ChronoDuration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::traits::KvStore;
use crate::types::ExportStatus;

pub struct ExportService {
    store: Arc<dyn KvStore>,
    /// How long a `Ready` bundle stays downloadable. Default 24 h.
    ttl_hours: i64,
}

impl ExportService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl_hours: 24,
        }
    }

    pub fn with_ttl_hours(mut self, hours: i64) -> Self {
        self.ttl_hours = hours;
        self
    }

    /// Accept an export request and start bundling in the background.
    /// A request while one is already processing is a conflict.
    pub async fn request_export(self: &Arc<Self>, user: &str) -> Result<()> {
        if self.store.get_export_status(user).await? == ExportStatus::Processing {
            return Err(StoreError::Conflict("export already processing".to_string()));
        }
        self.store
            .set_export_status(user, &ExportStatus::Processing)
            .await?;

        let service = Arc::clone(self);
        let user = user.to_string();
        tokio::spawn(async move {
            if let Err(e) = service.build_bundle(&user).await {
                tracing::error!(user = %user, error = %e, "export bundling failed");
                let _ = service.store.set_export_status(&user, &ExportStatus::None).await;
            }
        });
        Ok(())
    }

    async fn build_bundle(&self, user: &str) -> Result<()> {
        let conversations = self.store.list_conversations(user).await?;
        let mut convs = Vec::with_capacity(conversations.len());
        for conv in &conversations {
            let messages = self.store.list_messages(user, conv, None).await?;
            convs.push(json!({"conversation_id": conv, "messages": messages}));
        }
        let files = self.store.list_user_files(user).await?;
        let bundle = json!({
            "user_id": user,
            "exported_at": Utc::now().to_rfc3339(),
            "conversations": convs,
            "files": files,
        });

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(bundle.to_string().as_bytes())
            .map_err(|e| StoreError::PermanentIo(e.to_string()))?;
        let bytes = encoder
            .finish()
            .map_err(|e| StoreError::PermanentIo(e.to_string()))?;

        self.store.put_export_bundle(user, &bytes).await?;
        self.store
            .set_export_status(
                user,
                &ExportStatus::Ready {
                    location: crate::types::keys::export(user),
                    created_at: Utc::now(),
                },
            )
            .await?;
        tracing::info!(user = %user, size = bytes.len(), "export bundle ready");
        Ok(())
    }

    pub async fn status(&self, user: &str) -> Result<ExportStatus> {
        self.store.get_export_status(user).await
    }

    pub async fn download(&self, user: &str) -> Result<Vec<u8>> {
        match self.store.get_export_status(user).await? {
            ExportStatus::Ready { .. } => self.store.get_export_bundle(user).await,
            _ => Err(StoreError::NotFound("no export bundle ready".to_string())),
        }
    }

    pub async fn clear(&self, user: &str) -> Result<()> {
        self.store.clear_export(user).await
    }

    /// Drop a `Ready` bundle past its TTL. Returns true if it was cleared.
    pub async fn sweep_expired(&self, user: &str) -> Result<bool> {
        if let ExportStatus::Ready { created_at, .. } = self.store.get_export_status(user).await? {
            if Utc::now() - created_at > ChronoDuration::hours(self.ttl_hours) {
                self.store.clear_export(user).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use flate2::read::GzDecoder;
    use flowgraph::Message;
    use std::io::Read;
    use std::time::Duration;

    async fn ready_service() -> (Arc<ExportService>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .put_message("u", "c1", &Message::human("hello").with_id("m1"))
            .await
            .unwrap();
        let service = Arc::new(ExportService::new(store.clone()));
        (service, store)
    }

    #[tokio::test]
    async fn export_reaches_ready_and_decodes() {
        let (service, _store) = ready_service().await;
        service.request_export("u").await.unwrap();

        // bundling runs in a spawned task
        for _ in 0..50 {
            if matches!(service.status("u").await.unwrap(), ExportStatus::Ready { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let bytes = service.download("u").await.unwrap();
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut body = String::new();
        decoder.read_to_string(&mut body).unwrap();
        let bundle: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(bundle["user_id"], "u");
        assert_eq!(bundle["conversations"][0]["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn double_request_conflicts() {
        let (service, store) = ready_service().await;
        store
            .set_export_status("u", &ExportStatus::Processing)
            .await
            .unwrap();
        let err = service.request_export("u").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn expired_bundle_is_swept() {
        let (service, store) = ready_service().await;
        store
            .set_export_status(
                "u",
                &ExportStatus::Ready {
                    location: "export:u".to_string(),
                    created_at: Utc::now() - ChronoDuration::hours(48),
                },
            )
            .await
            .unwrap();
        assert!(service.sweep_expired("u").await.unwrap());
        assert_eq!(service.status("u").await.unwrap(), ExportStatus::None);
    }
}
