//! Provider registry keyed by id.

use flowgraph::ChatModel;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::{LlmConfigError, Result};
use crate::openai_compat::OpenAiCompatClient;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(providers: HashMap<String, ProviderConfig>) -> Self {
        Self { providers }
    }

    pub fn register(&mut self, id: impl Into<String>, config: ProviderConfig) {
        self.providers.insert(id.into(), config);
    }

    pub fn get(&self, id: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(id)
            .ok_or_else(|| LlmConfigError::UnknownProvider(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Build a chat model for `(provider, role)`.
    pub fn build(&self, provider_id: &str, role: &str) -> Result<Arc<dyn ChatModel>> {
        let config = self.get(provider_id)?;
        let model = config.model_for(role)?;
        Ok(Arc::new(
            OpenAiCompatClient::new(config.base_url.clone(), model).with_api_key(config.api_key()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ROLE_CODER, ROLE_DEFAULT};

    #[test]
    fn build_resolves_role_models() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            "local",
            ProviderConfig::new("http://localhost:8000/v1", "m-default")
                .with_model_for(ROLE_CODER, "m-code"),
        );
        assert!(registry.build("local", ROLE_CODER).is_ok());
        assert!(registry.build("local", ROLE_DEFAULT).is_ok());
        assert!(matches!(
            registry.build("missing", ROLE_DEFAULT),
            Err(LlmConfigError::UnknownProvider(_))
        ));
    }
}
