//! Per-session persistent sandbox binding.
//!
//! A `PersistentSandbox` binds one remote sandbox to one
//! `(user, conversation)` session: lazily provisioned on first use, seeded
//! with the session's CSV files, torn down with the session. Every operation
//! returns the uniform `(ok, payload)` shape the agent runtime expects -
//! sandbox trouble becomes a diagnostic payload, never an exception.
//!
//! All operations serialize through one mutex per binding so the sandbox
//! keeps its persistent working-directory illusion; sandboxes of distinct
//! sessions run in parallel.

use chrono::{DateTime, Utc};
use flowgraph::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use store::KvStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::SandboxClient;
use crate::error::{Result, SandboxError};
use crate::output::shape_output;

/// Marker prefix on payloads reporting a service outage. The data-science
/// routing watches for it to trigger the short-circuit path.
pub const SANDBOX_UNAVAILABLE: &str = "sandbox_unavailable";

/// Uniform result of a sandbox operation.
pub type OpResult = (bool, String);

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Truncation target for textual payloads.
    pub max_result_length: usize,
    /// Default deadline for `execute_code`.
    pub code_timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_result_length: 1000,
            code_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    sandbox_id: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    seeded_files: Vec<String>,
}

pub struct PersistentSandbox {
    user_id: String,
    snapshot: String,
    seed_file_ids: Vec<String>,
    client: Arc<dyn SandboxClient>,
    store: Arc<dyn KvStore>,
    limits: SandboxLimits,
    retry: RetryPolicy,
    inner: Mutex<Option<Binding>>,
}

impl PersistentSandbox {
    pub fn new(
        user_id: impl Into<String>,
        snapshot: impl Into<String>,
        seed_file_ids: Vec<String>,
        client: Arc<dyn SandboxClient>,
        store: Arc<dyn KvStore>,
        limits: SandboxLimits,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            snapshot: snapshot.into(),
            seed_file_ids,
            client,
            store,
            limits,
            retry: RetryPolicy::default(),
            inner: Mutex::new(None),
        }
    }

    /// Lazily provision the sandbox and seed it with the session's files.
    /// Idempotent: later calls return the cached binding.
    pub async fn ensure(&self) -> Result<String> {
        let mut guard = self.inner.lock().await;
        self.ensure_locked(&mut guard).await
    }

    async fn ensure_locked(&self, guard: &mut Option<Binding>) -> Result<String> {
        if let Some(binding) = guard.as_ref() {
            return Ok(binding.sandbox_id.clone());
        }

        let sandbox_id = self
            .retry
            .run(
                || self.client.create_from_snapshot(&self.snapshot),
                SandboxError::is_transient,
            )
            .await?;

        let mut seeded = Vec::with_capacity(self.seed_file_ids.len());
        for file_id in &self.seed_file_ids {
            match self.store.get_file(&self.user_id, file_id).await {
                Ok((handle, bytes)) => {
                    self.client
                        .upload(&sandbox_id, &handle.filename, &bytes)
                        .await?;
                    seeded.push(file_id.clone());
                }
                Err(e) => {
                    tracing::warn!(file_id = %file_id, error = %e, "seed file unavailable, skipping");
                }
            }
        }

        tracing::info!(user = %self.user_id, sandbox = %sandbox_id, files = seeded.len(), "sandbox provisioned");
        *guard = Some(Binding {
            sandbox_id: sandbox_id.clone(),
            created_at: Utc::now(),
            seeded_files: seeded,
        });
        Ok(sandbox_id)
    }

    /// Destroy the remote sandbox and forget the binding.
    pub async fn cleanup(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(binding) = guard.take() {
            self.client.destroy(&binding.sandbox_id).await?;
            tracing::info!(user = %self.user_id, sandbox = %binding.sandbox_id, "sandbox destroyed");
        }
        Ok(())
    }

    pub async fn sandbox_id(&self) -> Option<String> {
        self.inner.lock().await.as_ref().map(|b| b.sandbox_id.clone())
    }

    pub async fn seeded_files(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|b| b.seeded_files.clone())
            .unwrap_or_default()
    }

    fn shape(&self, payload: String) -> String {
        shape_output(&payload, self.limits.max_result_length)
    }

    fn shape_result(&self, result: Result<(bool, String)>) -> OpResult {
        match result {
            Ok((ok, payload)) => (ok, self.shape(payload)),
            Err(e) => (false, self.shape(describe_error(&e))),
        }
    }

    /// Serialize an operation through the binding mutex, provisioning first
    /// if needed.
    async fn with_sandbox<F, Fut>(&self, cancel: &CancellationToken, op: F) -> OpResult
    where
        F: FnOnce(Arc<dyn SandboxClient>, String) -> Fut,
        Fut: Future<Output = Result<(bool, String)>>,
    {
        let mut guard = self.inner.lock().await;
        let sandbox_id = match self.ensure_locked(&mut guard).await {
            Ok(id) => id,
            Err(e) => return (false, self.shape(describe_error(&e))),
        };
        let fut = op(Arc::clone(&self.client), sandbox_id);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SandboxError::Cancelled),
            res = fut => res,
        };
        self.shape_result(result)
    }

    pub async fn execute_code(
        &self,
        code: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> OpResult {
        let timeout = timeout.unwrap_or(self.limits.code_timeout);
        let code = code.to_string();
        self.with_sandbox(cancel, |client, id| async move {
            client.exec_code(&id, &code, Some(timeout)).await
        })
        .await
    }

    pub async fn pip_install(&self, packages: &[String], cancel: &CancellationToken) -> OpResult {
        if packages.is_empty() {
            return (false, "no packages given".to_string());
        }
        let cmd = format!("pip install --quiet {}", packages.join(" "));
        self.with_sandbox(cancel, |client, id| async move {
            let output = client.exec(&id, &cmd, Some(Duration::from_secs(300))).await?;
            Ok((true, if output.is_empty() {
                "install complete".to_string()
            } else {
                output
            }))
        })
        .await
    }

    pub async fn list_files(&self, path: &str, cancel: &CancellationToken) -> OpResult {
        let path = path.to_string();
        self.with_sandbox(cancel, |client, id| async move {
            let entries = client.list(&id, &path).await?;
            let listing = entries
                .iter()
                .map(|e| {
                    if e.is_dir {
                        format!("{}/", e.name)
                    } else {
                        format!("{} ({} bytes)", e.name, e.size)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok((true, listing))
        })
        .await
    }

    pub async fn read_file(&self, path: &str, cancel: &CancellationToken) -> OpResult {
        let path = path.to_string();
        self.with_sandbox(cancel, |client, id| async move {
            let (found, bytes) = client.read(&id, &path).await?;
            if !found {
                return Ok((false, format!("file not found: {path}")));
            }
            match String::from_utf8(bytes) {
                Ok(text) => Ok((true, text)),
                Err(e) => Ok((false, format!("file is not valid utf-8: {e}"))),
            }
        })
        .await
    }

    pub async fn write_file(&self, path: &str, content: &str, cancel: &CancellationToken) -> OpResult {
        let path = path.to_string();
        let content = content.to_string();
        self.with_sandbox(cancel, |client, id| async move {
            let ok = client.write(&id, &path, content.as_bytes()).await?;
            Ok((ok, if ok {
                format!("wrote {} bytes to {path}", content.len())
            } else {
                format!("failed to write {path}")
            }))
        })
        .await
    }

    /// Recursive file listing rooted at `path`, one relative path per line.
    pub async fn get_all_files_recursive(&self, path: &str, cancel: &CancellationToken) -> OpResult {
        let path = path.to_string();
        self.with_sandbox(cancel, |client, id| async move {
            let mut files = Vec::new();
            let mut queue = vec![path.clone()];
            while let Some(dir) = queue.pop() {
                for entry in client.list(&id, &dir).await? {
                    let full = if dir.is_empty() || dir == "." {
                        entry.name.clone()
                    } else {
                        format!("{}/{}", dir.trim_end_matches('/'), entry.name)
                    };
                    if entry.is_dir {
                        queue.push(full);
                    } else {
                        files.push(full);
                    }
                }
            }
            files.sort();
            Ok((true, files.join("\n")))
        })
        .await
    }

    /// Canned CSV profiler: tries a fixed encoding ladder and reports shape,
    /// columns, dtypes, and null counts.
    pub async fn describe_data(&self, path: &str, cancel: &CancellationToken) -> OpResult {
        let code = profiler_code(path);
        self.execute_code(&code, Some(Duration::from_secs(120)), cancel)
            .await
    }

    /// Shell escape hatch for git and friends.
    pub async fn exec(&self, cmd: &str, cancel: &CancellationToken) -> OpResult {
        let cmd = cmd.to_string();
        self.with_sandbox(cancel, |client, id| async move {
            let output = client.exec(&id, &cmd, Some(Duration::from_secs(120))).await?;
            Ok((true, output))
        })
        .await
    }
}

fn describe_error(e: &SandboxError) -> String {
    match e {
        SandboxError::UserCodeError(msg) => msg.clone(),
        SandboxError::SandboxGone => format!("{SANDBOX_UNAVAILABLE}: sandbox gone"),
        SandboxError::Unavailable(msg) => format!("{SANDBOX_UNAVAILABLE}: {msg}"),
        SandboxError::Timeout(secs) => format!("operation timed out after {secs}s"),
        SandboxError::QuotaExceeded => "sandbox quota exceeded".to_string(),
        SandboxError::Cancelled => "operation cancelled".to_string(),
    }
}

/// True when an operation payload reports a service outage.
pub fn is_outage_payload(payload: &str) -> bool {
    payload.starts_with(SANDBOX_UNAVAILABLE) || payload == "SandboxGone"
}

fn profiler_code(path: &str) -> String {
    let encodings = r#"["utf-8", "latin-1", "cp1252", "utf-16"]"#;
    format!(
        r#"import pandas as pd

path = {path:?}
df = None
last_error = None
for encoding in {encodings}:
    try:
        df = pd.read_csv(path, encoding=encoding)
        print(f"encoding: {{encoding}}")
        break
    except Exception as exc:
        last_error = exc

if df is None:
    print(f"could not read {{path}}: {{last_error}}")
else:
    print(f"shape: {{df.shape}}")
    print(f"columns: {{list(df.columns)}}")
    print("dtypes:")
    print(df.dtypes.to_string())
    print("null counts:")
    print(df.isnull().sum().to_string())
    print("head:")
    print(df.head().to_string())
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSandboxClient;
    use store::MemoryStore;

    fn fixture(client: Arc<MockSandboxClient>) -> PersistentSandbox {
        PersistentSandbox::new(
            "user-1",
            "data-analysis",
            Vec::new(),
            client,
            Arc::new(MemoryStore::new()),
            SandboxLimits::default(),
        )
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let client = Arc::new(MockSandboxClient::new());
        let sandbox = fixture(client.clone());
        let first = sandbox.ensure().await.unwrap();
        let second = sandbox.ensure().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.created_count(), 1);
    }

    #[tokio::test]
    async fn seeds_csv_files_on_first_ensure() {
        let client = Arc::new(MockSandboxClient::new());
        let store = Arc::new(MemoryStore::new());
        let handle = store::FileHandle {
            file_id: "f1".to_string(),
            filename: "sales.csv".to_string(),
            mime: "text/csv".to_string(),
            size: 7,
            indexed: false,
            uploaded_at: Utc::now(),
            source: "upload".to_string(),
            vector_ids: Vec::new(),
        };
        store.put_file("user-1", &handle, b"a,b\n1,2").await.unwrap();

        let sandbox = PersistentSandbox::new(
            "user-1",
            "data-analysis",
            vec!["f1".to_string()],
            client.clone(),
            store,
            SandboxLimits::default(),
        );
        let id = sandbox.ensure().await.unwrap();
        let (found, bytes) = client.read(&id, "sales.csv").await.unwrap();
        assert!(found);
        assert_eq!(bytes, b"a,b\n1,2");
        assert_eq!(sandbox.seeded_files().await, vec!["f1".to_string()]);
    }

    #[tokio::test]
    async fn execute_code_shapes_long_output() {
        let client = Arc::new(MockSandboxClient::new());
        client.script_exec_code(Ok((true, "y".repeat(5000))));
        let sandbox = fixture(client);
        let cancel = CancellationToken::new();
        let (ok, payload) = sandbox.execute_code("print('x')", None, &cancel).await;
        assert!(ok);
        assert!(payload.contains("5000 chars total"));
        assert!(payload.chars().count() < 5000);
    }

    #[tokio::test]
    async fn outage_becomes_tagged_payload() {
        let client = Arc::new(MockSandboxClient::new());
        client.script_exec_code(Err(SandboxError::SandboxGone));
        let sandbox = fixture(client);
        // bind first so the failure comes from the op, not provisioning
        sandbox.ensure().await.unwrap();
        let cancel = CancellationToken::new();
        let (ok, payload) = sandbox.execute_code("print('x')", None, &cancel).await;
        assert!(!ok);
        assert!(is_outage_payload(&payload));
    }

    #[tokio::test]
    async fn read_missing_file_is_not_an_error() {
        let client = Arc::new(MockSandboxClient::new());
        let sandbox = fixture(client);
        let cancel = CancellationToken::new();
        let (ok, payload) = sandbox.read_file("nope.txt", &cancel).await;
        assert!(!ok);
        assert!(payload.contains("file not found"));
    }

    #[tokio::test]
    async fn cleanup_destroys_binding() {
        let client = Arc::new(MockSandboxClient::new());
        let sandbox = fixture(client.clone());
        let id = sandbox.ensure().await.unwrap();
        sandbox.cleanup().await.unwrap();
        assert!(sandbox.sandbox_id().await.is_none());
        assert!(client.is_destroyed(&id));
    }
}
