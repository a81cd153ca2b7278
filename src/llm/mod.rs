//! LLM integration.
//!
//! - [`LlmProvider`]: the backend seam. Anthropic and OpenAI ship via
//!   rig-core, bridged by [`RigAdapter`].
//! - [`LlmRunner`]: retries, backoff, per-attempt timeout and normalization.
//! - [`ProviderRegistry`]: named providers injected into handlers.

pub mod provider;
pub mod registry;
mod rig_adapter;
pub mod runner;

pub use provider::*;
pub use registry::ProviderRegistry;
pub use rig_adapter::RigAdapter;
pub use runner::LlmRunner;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Registry name of the backend.
    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "INFERENCE_PROVIDER".to_string(),
                message: format!("unknown backend '{other}', expected openai or anthropic"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl ProviderConfig {
    /// Read `INFERENCE_PROVIDER` (`openai` or `anthropic`, default
    /// `openai`), `INFERENCE_PROVIDER_API_KEY` (required) and
    /// `INFERENCE_PROVIDER_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("INFERENCE_PROVIDER") {
            Ok(raw) => raw.parse()?,
            Err(_) => LlmBackend::OpenAi,
        };
        let api_key = std::env::var("INFERENCE_PROVIDER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("INFERENCE_PROVIDER_API_KEY".to_string()))?;
        Ok(Self {
            backend,
            api_key,
            model: std::env::var("INFERENCE_PROVIDER_MODEL")
                .unwrap_or_else(|_| backend.default_model().to_string()),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, "Using Anthropic");
    Ok(Arc::new(RigAdapter::new(model, "anthropic", &config.model)))
}

fn create_openai_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, "Using OpenAI");
    Ok(Arc::new(RigAdapter::new(model, "openai", &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: LlmBackend, model: &str) -> ProviderConfig {
        ProviderConfig {
            backend,
            api_key: SecretString::from("test-key"),
            model: model.to_string(),
        }
    }

    #[test]
    fn openai_provider_constructs_without_network() {
        let provider = create_provider(&config(LlmBackend::OpenAi, "gpt-4o")).unwrap();
        assert_eq!(provider.provider_name(), "openai");
        assert_eq!(provider.model_name(), "gpt-4o");
    }

    #[test]
    fn anthropic_provider_constructs_without_network() {
        let provider =
            create_provider(&config(LlmBackend::Anthropic, "claude-3-5-sonnet-latest")).unwrap();
        assert_eq!(provider.provider_name(), "anthropic");
        assert_eq!(provider.model_name(), "claude-3-5-sonnet-latest");
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("OpenAI".parse::<LlmBackend>().unwrap(), LlmBackend::OpenAi);
        assert_eq!(" anthropic ".parse::<LlmBackend>().unwrap(), LlmBackend::Anthropic);
        assert!(matches!(
            "gemini".parse::<LlmBackend>(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
