//! Tool trait and input decoding.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ToolError;

/// Decoded action input. Planner output is JSON when it parses as an
/// object or array and plain text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    Text(String),
    Json(serde_json::Value),
}

impl ToolInput {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                Self::Json(value)
            }
            Ok(serde_json::Value::String(s)) => Self::Text(s),
            _ => Self::Text(trimmed.to_string()),
        }
    }

    /// Text form: the string itself, or compact JSON.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }
}

/// Who is calling a tool. Tools that read stored data scope it to
/// `agent_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub agent_id: String,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

/// An action the agent can take.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Action name the planner uses to call this tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Per-tool timeout; the engine default applies when `None`.
    fn execution_timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the tool and return the observation text.
    async fn run(&self, input: ToolInput, ctx: &ToolContext) -> Result<String, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_input_forms() {
        assert_eq!(
            ToolInput::parse(r#"{"query": "rust", "top_k": 3}"#),
            ToolInput::Json(json!({"query": "rust", "top_k": 3}))
        );
        assert_eq!(ToolInput::parse("  rust async  "), ToolInput::Text("rust async".into()));
        assert_eq!(ToolInput::parse(r#""quoted""#), ToolInput::Text("quoted".into()));
        assert_eq!(ToolInput::parse("42"), ToolInput::Text("42".into()));
        assert_eq!(ToolInput::parse("{broken"), ToolInput::Text("{broken".into()));
    }

    #[test]
    fn as_text_round_trips_text() {
        assert_eq!(ToolInput::Text("a b".into()).as_text(), "a b");
        assert_eq!(ToolInput::Json(json!([1, 2])).as_text(), "[1,2]");
    }
}
