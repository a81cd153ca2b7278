//! Parsing planner output into a single step.

use std::sync::LazyLock;

use regex::Regex;

/// Action chosen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionType {
    Finish,
    Search,
    VectorSearch,
    ExternalApi,
    Summary,
    /// Any other name; resolved through the tool registry like the rest.
    Other(String),
}

impl ActionType {
    /// Normalize a raw action name. Accepts `ActionType.SEARCH`, backticks,
    /// mixed case, and dashes or spaces for underscores.
    pub fn from_name(raw: &str) -> Self {
        let name = raw
            .trim()
            .trim_matches(|c| c == '`' || c == '"' || c == '\'')
            .trim();
        let name = name.strip_prefix("ActionType.").unwrap_or(name);
        let name = name.to_lowercase().replace(['-', ' '], "_");
        match name.as_str() {
            "finish" => Self::Finish,
            "search" => Self::Search,
            "vector_search" => Self::VectorSearch,
            "external_api" => Self::ExternalApi,
            "summary" => Self::Summary,
            _ => Self::Other(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Finish => "finish",
            Self::Search => "search",
            Self::VectorSearch => "vector_search",
            Self::ExternalApi => "external_api",
            Self::Summary => "summary",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed planner step.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    pub thought: String,
    pub action: ActionType,
    pub action_input: Option<String>,
}

impl AgentStep {
    pub fn finish(thought: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            action: ActionType::Finish,
            action_input: Some(answer.into()),
        }
    }
}

static STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)(?:Thought:[ \t]*(.*?)\s*\n)?Action:[ \t]*([^\n]+)(?:\nAction[ _]?Input:[ \t]*(.*?))?\s*(?:\nThought:|\z)",
    )
    .expect("step regex is valid")
});

static FINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?:Thought:[ \t]*(.*?)\s*\n)?Final(?:[ _]Answer)?:[ \t]*(.*)")
        .expect("final regex is valid")
});

fn non_empty(s: Option<regex::Match<'_>>) -> Option<String> {
    let text = s?.as_str().trim();
    match text {
        "" | "None" | "none" | "null" => None,
        _ => Some(text.to_string()),
    }
}

/// Parse the first Thought/Action/ActionInput or Thought/Final block.
/// Returns `None` when the text matches neither.
pub fn parse_step(text: &str) -> Option<AgentStep> {
    if let Some(caps) = STEP_RE.captures(text) {
        let thought = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let action = ActionType::from_name(caps.get(2).map(|m| m.as_str()).unwrap_or_default());
        return Some(AgentStep {
            thought: thought.to_string(),
            action,
            action_input: non_empty(caps.get(3)),
        });
    }

    let caps = FINAL_RE.captures(text)?;
    Some(AgentStep {
        thought: caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        action: ActionType::Finish,
        action_input: non_empty(caps.get(2)),
    })
}
