//! LLM-backed summarization tool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::prompts::SUMMARIZE_TEXT_INSTRUCTION;
use crate::error::ToolError;
use crate::llm::{CompletionRequest, LlmProvider, LlmRunner};
use crate::tools::tool::{Tool, ToolContext, ToolInput};

/// Summarizes text through the runner.
pub struct SummaryTool {
    llm: Arc<dyn LlmProvider>,
    runner: LlmRunner,
}

impl SummaryTool {
    pub fn new(llm: Arc<dyn LlmProvider>, runner: LlmRunner) -> Self {
        Self { llm, runner }
    }

    /// Summarize `text` directly, outside the agent loop.
    pub async fn summarize(&self, text: &str) -> Result<String, ToolError> {
        let request =
            CompletionRequest::new(text.to_string()).with_instruction(SUMMARIZE_TEXT_INSTRUCTION);
        let response = self
            .runner
            .run(self.llm.as_ref(), request)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;
        Ok(response.text.trim().to_string())
    }
}

#[async_trait]
impl Tool for SummaryTool {
    fn name(&self) -> &str {
        "summary"
    }

    fn description(&self) -> &str {
        "Summarize a piece of text. Input: the text, or JSON {\"text\": \"...\"}."
    }

    async fn run(&self, input: ToolInput, _ctx: &ToolContext) -> Result<String, ToolError> {
        let text = match &input {
            ToolInput::Json(value) => match value.get("text").and_then(|t| t.as_str()) {
                Some(text) => text.to_string(),
                None => input.as_text(),
            },
            ToolInput::Text(text) => text.clone(),
        };
        if text.trim().is_empty() {
            return Err(ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: "nothing to summarize".to_string(),
            });
        }
        self.summarize(&text).await
    }
}
