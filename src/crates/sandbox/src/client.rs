//! Typed client for the external sandbox service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::error::{Result, SandboxError};

/// One directory entry from a sandbox listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
}

/// Operations the sandbox service exposes. `exec_code` reports user-code
/// failure in-band as `(false, output)`; transport and lifecycle failures
/// come back as [`SandboxError`].
#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn create_from_snapshot(&self, snapshot: &str) -> Result<String>;

    async fn upload(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> Result<()>;

    /// `(false, _)` when the path does not exist.
    async fn read(&self, sandbox_id: &str, path: &str) -> Result<(bool, Vec<u8>)>;

    async fn write(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> Result<bool>;

    async fn list(&self, sandbox_id: &str, path: &str) -> Result<Vec<EntryInfo>>;

    /// Run a shell command; returns combined stdout+stderr.
    async fn exec(&self, sandbox_id: &str, cmd: &str, timeout: Option<Duration>) -> Result<String>;

    /// Run code in the sandbox interpreter; `(ok, combined_output)`.
    async fn exec_code(
        &self,
        sandbox_id: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<(bool, String)>;

    async fn destroy(&self, sandbox_id: &str) -> Result<()>;
}

/// HTTP implementation against the sandbox service's REST surface.
pub struct HttpSandboxClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSandboxClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn map_send_error(e: reqwest::Error) -> SandboxError {
        if e.is_timeout() {
            SandboxError::Timeout(0)
        } else {
            SandboxError::Unavailable(e.to_string())
        }
    }

    fn check_status(status: reqwest::StatusCode) -> Result<()> {
        match status.as_u16() {
            404 | 410 => Err(SandboxError::SandboxGone),
            429 => Err(SandboxError::QuotaExceeded),
            s if s >= 500 => Err(SandboxError::Unavailable(format!("service returned {s}"))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn create_from_snapshot(&self, snapshot: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/sandboxes"))
            .json(&json!({"snapshot": snapshot}))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status())?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        body["sandbox_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SandboxError::Unavailable("create returned no sandbox_id".to_string()))
    }

    async fn upload(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> Result<()> {
        let resp = self
            .http
            .put(self.url(&format!("/sandboxes/{sandbox_id}/files")))
            .query(&[("path", path)])
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status())
    }

    async fn read(&self, sandbox_id: &str, path: &str) -> Result<(bool, Vec<u8>)> {
        let resp = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}/files")))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        // 404 here means the *path* is missing, not the sandbox; the service
        // reports a dead sandbox as 410.
        if resp.status().as_u16() == 404 {
            return Ok((false, Vec::new()));
        }
        Self::check_status(resp.status())?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        Ok((true, bytes.to_vec()))
    }

    async fn write(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> Result<bool> {
        match self.upload(sandbox_id, path, bytes).await {
            Ok(()) => Ok(true),
            Err(SandboxError::UserCodeError(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, sandbox_id: &str, path: &str) -> Result<Vec<EntryInfo>> {
        let resp = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}/entries")))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status())?;
        resp.json()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))
    }

    async fn exec(&self, sandbox_id: &str, cmd: &str, timeout: Option<Duration>) -> Result<String> {
        let resp = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/exec")))
            .json(&json!({
                "cmd": cmd,
                "timeout_secs": timeout.map(|t| t.as_secs()),
            }))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status())?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        Ok(body["output"].as_str().unwrap_or_default().to_string())
    }

    async fn exec_code(
        &self,
        sandbox_id: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<(bool, String)> {
        let resp = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/exec_code")))
            .json(&json!({
                "code": code,
                "timeout_secs": timeout.map(|t| t.as_secs()),
            }))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status())?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        Ok((
            body["ok"].as_bool().unwrap_or(false),
            body["output"].as_str().unwrap_or_default().to_string(),
        ))
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/sandboxes/{sandbox_id}")))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        // destroying an already-gone sandbox is fine
        if resp.status().as_u16() == 404 || resp.status().as_u16() == 410 {
            return Ok(());
        }
        Self::check_status(resp.status())
    }
}
