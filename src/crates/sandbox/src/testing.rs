//! In-memory sandbox double shared by tests across the workspace.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{EntryInfo, SandboxClient};
use crate::error::{Result, SandboxError};

/// Scripted, in-memory [`SandboxClient`]. Files live in a flat per-sandbox
/// namespace; `exec_code` replies can be scripted ahead of time to drive
/// failure-path tests (first scripted reply is consumed first).
#[derive(Default)]
pub struct MockSandboxClient {
    files: DashMap<String, DashMap<String, Vec<u8>>>,
    created: AtomicU64,
    destroyed: DashMap<String, bool>,
    scripted_exec_code: Mutex<VecDeque<Result<(bool, String)>>>,
    scripted_create: Mutex<VecDeque<Result<String>>>,
    exec_log: Mutex<Vec<String>>,
}

impl MockSandboxClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next `exec_code` reply.
    pub fn script_exec_code(&self, result: Result<(bool, String)>) {
        self.scripted_exec_code
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    /// Queue the next `create_from_snapshot` reply.
    pub fn script_create(&self, result: Result<String>) {
        self.scripted_create
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self, sandbox_id: &str) -> bool {
        self.destroyed.get(sandbox_id).map(|e| *e).unwrap_or(false)
    }

    pub fn exec_history(&self) -> Vec<String> {
        self.exec_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check_alive(&self, sandbox_id: &str) -> Result<()> {
        if self.is_destroyed(sandbox_id) || !self.files.contains_key(sandbox_id) {
            return Err(SandboxError::SandboxGone);
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxClient for MockSandboxClient {
    async fn create_from_snapshot(&self, _snapshot: &str) -> Result<String> {
        if let Some(scripted) = self
            .scripted_create
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return scripted;
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("sbx-{n}");
        self.files.insert(id.clone(), DashMap::new());
        Ok(id)
    }

    async fn upload(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> Result<()> {
        self.check_alive(sandbox_id)?;
        self.files
            .get(sandbox_id)
            .ok_or(SandboxError::SandboxGone)?
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, sandbox_id: &str, path: &str) -> Result<(bool, Vec<u8>)> {
        self.check_alive(sandbox_id)?;
        Ok(self
            .files
            .get(sandbox_id)
            .and_then(|fs| fs.get(path).map(|b| b.clone()))
            .map(|bytes| (true, bytes))
            .unwrap_or((false, Vec::new())))
    }

    async fn write(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> Result<bool> {
        self.upload(sandbox_id, path, bytes).await?;
        Ok(true)
    }

    async fn list(&self, sandbox_id: &str, _path: &str) -> Result<Vec<EntryInfo>> {
        self.check_alive(sandbox_id)?;
        let mut entries: Vec<EntryInfo> = self
            .files
            .get(sandbox_id)
            .map(|fs| {
                fs.iter()
                    .map(|e| EntryInfo {
                        name: e.key().clone(),
                        is_dir: false,
                        size: e.value().len() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exec(&self, sandbox_id: &str, cmd: &str, _timeout: Option<Duration>) -> Result<String> {
        self.check_alive(sandbox_id)?;
        self.exec_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.to_string());
        Ok(String::new())
    }

    async fn exec_code(
        &self,
        sandbox_id: &str,
        _code: &str,
        _timeout: Option<Duration>,
    ) -> Result<(bool, String)> {
        if let Some(scripted) = self
            .scripted_exec_code
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return scripted;
        }
        self.check_alive(sandbox_id)?;
        Ok((true, "ok".to_string()))
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        self.files.remove(sandbox_id);
        self.destroyed.insert(sandbox_id.to_string(), true);
        Ok(())
    }
}
