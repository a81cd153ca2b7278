//! Named provider lookup, built at startup and injected.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::provider::LlmProvider;

/// Providers keyed by name, with one default.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name. The first one registered
    /// becomes the default.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let name = provider.provider_name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        tracing::debug!(provider = %name, model = %provider.model_name(), "Registered provider");
        self.providers.insert(name, provider);
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    /// Resolve a selector; `None` picks the default.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let key = name.or(self.default.as_deref()).unwrap_or("default");
        self.providers
            .get(key)
            .cloned()
            .ok_or_else(|| LlmError::NoProvider {
                name: key.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, CompletionResponse};
    use async_trait::async_trait;

    struct Named(String);

    #[async_trait]
    impl LlmProvider for Named {
        fn provider_name(&self) -> &str {
            &self.0
        }
        fn model_name(&self) -> &str {
            "m"
        }
        async fn generate(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse::default())
        }
    }

    fn provider(name: &str) -> Arc<dyn LlmProvider> {
        Arc::new(Named(name.to_string()))
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = ProviderRegistry::new();
        registry.register(provider("a"));
        registry.register(provider("b"));
        assert_eq!(registry.resolve(None).unwrap().provider_name(), "a");
        assert_eq!(registry.resolve(Some("b")).unwrap().provider_name(), "b");
    }

    #[test]
    fn explicit_default_and_missing() {
        let mut registry = ProviderRegistry::new();
        registry.register(provider("a"));
        registry.register(provider("b"));
        let registry = registry.with_default("b");
        assert_eq!(registry.resolve(None).unwrap().provider_name(), "b");
        assert!(matches!(
            registry.resolve(Some("gemini")),
            Err(LlmError::NoProvider { .. })
        ));
        assert!(ProviderRegistry::new().resolve(None).is_err());
    }
}
