//! Server configuration: defaults, optional TOML file, environment
//! overrides. Loaded once at startup and passed in; nothing reads it
//! globally.

use llm::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Idle session sweep threshold, seconds.
    pub session_timeout_secs: u64,
    /// Grace window after a disconnect before runs are cancelled, seconds.
    pub run_resume_grace_secs: u64,
    /// Per-node execution deadline, seconds.
    pub node_timeout_secs: u64,
    /// Default `execute_code` deadline, seconds.
    pub default_code_timeout_secs: u64,
    /// How long an emit may block on a full channel before the session is
    /// marked inactive, seconds.
    pub emit_backpressure_timeout_secs: u64,
    pub max_agent_iters: usize,
    pub max_fix: usize,
    pub max_qa_retries: i64,
    pub max_process_self_loops: i64,
    /// Sandbox output truncation target, characters.
    pub max_result_length: usize,
    /// Snapshot image for data-science sandbox bindings.
    pub sandbox_snapshot: String,
    /// Feature flag; `None` means auto-enable when a CSV is referenced.
    pub enable_data_science: Option<bool>,
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: String,
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub sandbox_service_url: String,
    /// Expose `/admin/*` routes.
    pub admin_api: bool,
    /// Outbound event channel capacity per session.
    pub emit_channel_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_timeout_secs: 600,
            run_resume_grace_secs: 300,
            node_timeout_secs: 180,
            default_code_timeout_secs: 60,
            emit_backpressure_timeout_secs: 30,
            max_agent_iters: 15,
            max_fix: 3,
            max_qa_retries: 2,
            max_process_self_loops: 3,
            max_result_length: 1000,
            sandbox_snapshot: "data-analysis".to_string(),
            enable_data_science: None,
            providers: HashMap::new(),
            default_provider: "default".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            redis_url: None,
            sandbox_service_url: "http://localhost:9090".to_string(),
            admin_api: false,
            emit_channel_capacity: 64,
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (if any), then environment overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let body = std::fs::read_to_string(path)?;
                toml::from_str(&body)?
            }
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("MANTA_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("MANTA_REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Ok(url) = std::env::var("MANTA_SANDBOX_URL") {
            self.sandbox_service_url = url;
        }
        if let Ok(snapshot) = std::env::var("MANTA_SANDBOX_SNAPSHOT") {
            self.sandbox_snapshot = snapshot;
        }
        if let Ok(flag) = std::env::var("MANTA_ENABLE_DATA_SCIENCE") {
            self.enable_data_science = flag.parse().ok();
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn run_resume_grace(&self) -> Duration {
        Duration::from_secs(self.run_resume_grace_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn emit_backpressure_timeout(&self) -> Duration {
        Duration::from_secs(self.emit_backpressure_timeout_secs)
    }

    pub fn sandbox_limits(&self) -> sandbox::SandboxLimits {
        sandbox::SandboxLimits {
            max_result_length: self.max_result_length,
            code_timeout: Duration::from_secs(self.default_code_timeout_secs),
        }
    }

    pub fn pipeline_limits(&self) -> agents::PipelineLimits {
        agents::PipelineLimits {
            max_agent_iters: self.max_agent_iters,
            max_fix: self.max_fix,
            max_qa_retries: self.max_qa_retries,
            max_process_self_loops: self.max_process_self_loops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.session_timeout(), Duration::from_secs(600));
        assert_eq!(s.run_resume_grace(), Duration::from_secs(300));
        assert_eq!(s.node_timeout(), Duration::from_secs(180));
        assert_eq!(s.max_agent_iters, 15);
        assert_eq!(s.max_fix, 3);
        assert_eq!(s.max_qa_retries, 2);
        assert_eq!(s.max_result_length, 1000);
        assert_eq!(s.sandbox_snapshot, "data-analysis");
    }

    #[test]
    fn toml_round_trip() {
        let s = Settings::default();
        let body = toml::to_string(&s).unwrap();
        let back: Settings = toml::from_str(&body).unwrap();
        assert_eq!(back.session_timeout_secs, s.session_timeout_secs);
    }
}
