//! Durable record types and the key layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for an uploaded or produced file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHandle {
    pub file_id: String,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    /// True once vector indexing finished (PDFs only).
    #[serde(default)]
    pub indexed: bool,
    pub uploaded_at: DateTime<Utc>,
    /// Where the file came from: `upload`, `sandbox`, ...
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector_ids: Vec<String>,
}

impl FileHandle {
    /// CSV files are the trigger for the data-science pipeline.
    pub fn is_csv(&self) -> bool {
        self.mime == "text/csv"
    }
}

/// Per-session durable metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub last_active: DateTime<Utc>,
    /// Bumped on every reconnect; stale sockets compare epochs.
    pub socket_epoch: u64,
}

/// Export bundle lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExportStatus {
    None,
    Processing,
    Ready {
        location: String,
        created_at: DateTime<Utc>,
    },
}

impl Default for ExportStatus {
    fn default() -> Self {
        ExportStatus::None
    }
}

/// Key layout. Everything is user-scoped; runs are global because a run id
/// is already unique.
pub mod keys {
    pub fn message(user: &str, conv: &str, msg_id: &str) -> String {
        format!("message:{user}:{conv}:{msg_id}")
    }

    pub fn message_index(user: &str, conv: &str) -> String {
        format!("messages:{user}:{conv}")
    }

    pub fn file(user: &str, file_id: &str) -> String {
        format!("file:{user}:{file_id}")
    }

    pub fn file_index(user: &str) -> String {
        format!("files:{user}")
    }

    pub fn session(user: &str, conv: &str) -> String {
        format!("session:{user}:{conv}")
    }

    pub fn run(run_id: &str) -> String {
        format!("run:{run_id}")
    }

    pub fn export(user: &str) -> String {
        format!("export:{user}")
    }

    pub fn share_token(token: &str) -> String {
        format!("share:{token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_detection() {
        let mut handle = FileHandle {
            file_id: "f1".to_string(),
            filename: "sales.csv".to_string(),
            mime: "text/csv".to_string(),
            size: 10,
            indexed: false,
            uploaded_at: Utc::now(),
            source: "upload".to_string(),
            vector_ids: Vec::new(),
        };
        assert!(handle.is_csv());
        handle.mime = "application/pdf".to_string();
        assert!(!handle.is_csv());
    }

    #[test]
    fn key_layout() {
        assert_eq!(keys::message("u", "c", "m"), "message:u:c:m");
        assert_eq!(keys::run("r-1"), "run:r-1");
        assert_eq!(keys::export("u"), "export:u");
    }
}
