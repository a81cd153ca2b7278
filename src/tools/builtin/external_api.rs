//! External API placeholder tool.

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolInput};

/// Returns a canned JSON response for the query.
pub struct ExternalApiTool;

#[async_trait]
impl Tool for ExternalApiTool {
    fn name(&self) -> &str {
        "external_api"
    }

    fn description(&self) -> &str {
        "Query an external API. Input: plain-text request."
    }

    async fn run(&self, input: ToolInput, _ctx: &ToolContext) -> Result<String, ToolError> {
        let query = input.as_text();
        Ok(json!({
            "query": query,
            "result": format!("Response for '{query}'"),
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_json_response() {
        let out = ExternalApiTool
            .run(ToolInput::parse("weather in Oslo"), &ToolContext::new("a1"))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["query"], "weather in Oslo");
        assert_eq!(value["result"], "Response for 'weather in Oslo'");
    }
}
