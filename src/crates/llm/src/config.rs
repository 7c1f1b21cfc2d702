//! Provider configuration.
//!
//! Providers are pure configuration: a base URL, an environment variable
//! naming the API key, and default model identifiers per agent role. Nothing
//! in the workspace hardcodes a vendor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{LlmConfigError, Result};

/// Agent roles that may want different models.
pub const ROLE_DEFAULT: &str = "default";
pub const ROLE_PLANNER: &str = "planner";
pub const ROLE_CODER: &str = "coder";
pub const ROLE_REVIEWER: &str = "reviewer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Environment variable holding the API key; empty means no auth header
    /// (local servers).
    #[serde(default)]
    pub api_key_env: String,
    /// Role -> model id. Must contain at least `default`.
    pub default_models: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        let mut default_models = HashMap::new();
        default_models.insert(ROLE_DEFAULT.to_string(), default_model.into());
        Self {
            base_url: base_url.into(),
            api_key_env: String::new(),
            default_models,
        }
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = var.into();
        self
    }

    pub fn with_model_for(mut self, role: impl Into<String>, model: impl Into<String>) -> Self {
        self.default_models.insert(role.into(), model.into());
        self
    }

    /// Model for a role, falling back to the provider default.
    pub fn model_for(&self, role: &str) -> Result<&str> {
        self.default_models
            .get(role)
            .or_else(|| self.default_models.get(ROLE_DEFAULT))
            .map(String::as_str)
            .ok_or_else(|| LlmConfigError::NoModel {
                role: role.to_string(),
            })
    }

    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_falls_back_to_default() {
        let config = ProviderConfig::new("http://localhost:8000/v1", "base-model")
            .with_model_for(ROLE_CODER, "code-model");
        assert_eq!(config.model_for(ROLE_CODER).unwrap(), "code-model");
        assert_eq!(config.model_for(ROLE_PLANNER).unwrap(), "base-model");
    }

    #[test]
    fn missing_default_is_an_error() {
        let config = ProviderConfig {
            base_url: "http://x".to_string(),
            api_key_env: String::new(),
            default_models: HashMap::new(),
        };
        assert!(config.model_for(ROLE_DEFAULT).is_err());
    }
}
