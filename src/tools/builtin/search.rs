//! Web search placeholder tool.

use async_trait::async_trait;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolInput};

/// Echoes the query as a search result. Stands in for a real search
/// backend, which lives outside this crate.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web. Input: plain-text query."
    }

    async fn run(&self, input: ToolInput, _ctx: &ToolContext) -> Result<String, ToolError> {
        let query = input.as_text();
        if query.trim().is_empty() {
            return Err(ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: "empty query".to_string(),
            });
        }
        Ok(format!("Search results for: {query}"))
    }
}
