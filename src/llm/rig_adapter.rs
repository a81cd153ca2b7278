//! Bridge from rig's `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{AssistantContent, CompletionModel};
use serde_json::json;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Usage};

/// Wraps any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    provider: String,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, provider: &str, model_name: &str) -> Self {
        Self {
            model,
            provider: provider.to_string(),
            model_name: model_name.to_string(),
        }
    }
}

/// Concatenated text parts of a completion. `None` when the model
/// returned no text at all (tool calls only, or nothing).
pub(crate) fn choice_text(choice: &OneOrMany<AssistantContent>) -> Option<String> {
    let parts: Vec<String> = choice
        .iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

/// Token counts as reported by rig. Zero counts mean the backend did not
/// report usage.
pub(crate) fn usage_from(input_tokens: u64, output_tokens: u64) -> Option<Usage> {
    if input_tokens == 0 && output_tokens == 0 {
        return None;
    }
    Some(
        Usage {
            prompt_tokens: u32::try_from(input_tokens).ok(),
            completion_tokens: u32::try_from(output_tokens).ok(),
            total_tokens: None,
        }
        .normalized(),
    )
}

#[async_trait]
impl<M: CompletionModel> LlmProvider for RigAdapter<M> {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut builder = self
            .model
            .completion_request(request.prompt.clone())
            .temperature(f64::from(request.config.temperature))
            .max_tokens(u64::from(request.config.max_tokens))
            .additional_params(json!({ "top_p": request.config.top_p }));
        if !request.instruction.is_empty() {
            builder = builder.preamble(request.instruction.join("\n\n"));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider.clone(),
            reason: e.to_string(),
        })?;

        let text = choice_text(&response.choice).ok_or_else(|| LlmError::InvalidResponse {
            provider: self.provider.clone(),
            reason: "completion has no text content".to_string(),
        })?;

        Ok(CompletionResponse {
            text,
            finish_reason: None,
            usage: usage_from(response.usage.input_tokens, response.usage.output_tokens),
            provider: self.provider.clone(),
        })
    }
}
