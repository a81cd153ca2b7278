//! Provider trait and the request/response shapes around it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Sampling parameters sent with every generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 512,
        }
    }
}

/// Token accounting. Any field may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: None,
        }
        .normalized()
    }

    /// Recompute `total_tokens` from its parts when both are known. A sum
    /// that does not fit keeps the reported total.
    pub fn normalized(self) -> Self {
        let total_tokens = match (self.prompt_tokens, self.completion_tokens) {
            (Some(p), Some(c)) => p.checked_add(c).or(self.total_tokens),
            _ => self.total_tokens,
        };
        Self {
            total_tokens,
            ..self
        }
    }

    /// Field-wise sum, treating unknown as zero. A field that overflows
    /// becomes unknown.
    pub fn accumulate(&mut self, other: &Usage) {
        let add = |a: Option<u32>, b: Option<u32>| match (a, b) {
            (None, None) => None,
            (a, b) => a.unwrap_or(0).checked_add(b.unwrap_or(0)),
        };
        self.prompt_tokens = add(self.prompt_tokens, other.prompt_tokens);
        self.completion_tokens = add(self.completion_tokens, other.completion_tokens);
        self.total_tokens = add(self.total_tokens, other.total_tokens);
        *self = self.normalized();
    }
}

/// A single generation request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub config: GenerationConfig,
    /// System-level instructions, in order.
    pub instruction: Vec<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            config: GenerationConfig::default(),
            instruction: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction.push(instruction.into());
        self
    }
}

/// Raw provider output before normalization.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub provider: String,
}

/// Normalized response handed to callers of the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub finish_reason: String,
    pub usage: Usage,
    pub provider: String,
    pub model: String,
    pub generation_config: GenerationConfig,
    pub prompt: String,
}

impl LlmResponse {
    pub fn normalize(
        raw: CompletionResponse,
        request: &CompletionRequest,
        model: &str,
    ) -> Self {
        Self {
            text: raw.text,
            finish_reason: raw.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: raw.usage.unwrap_or_default().normalized(),
            provider: raw.provider,
            model: model.to_string(),
            generation_config: request.config,
            prompt: request.prompt.clone(),
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Registry name, e.g. `openai`.
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Generate one completion. Non-success responses are errors.
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
