//! Semantic recall over an injected search index.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolInput};

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
}

/// Backend the vector search tool queries. Embedding and storage live
/// behind this trait. Results come only from documents stored for
/// `agent_id`.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(
        &self,
        agent_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ToolError>;
}

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 20;

#[derive(Debug, Deserialize)]
struct VectorSearchArgs {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// `vector_search` action.
pub struct VectorSearchTool {
    index: Arc<dyn SearchIndex>,
}

impl VectorSearchTool {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    fn args(&self, input: ToolInput) -> Result<VectorSearchArgs, ToolError> {
        let invalid = |reason: String| ToolError::InvalidParameters {
            name: self.name().to_string(),
            reason,
        };
        let args = match input {
            ToolInput::Json(value) => serde_json::from_value::<VectorSearchArgs>(value)
                .map_err(|e| invalid(e.to_string()))?,
            ToolInput::Text(query) => VectorSearchArgs {
                query,
                top_k: DEFAULT_TOP_K,
            },
        };
        if args.query.trim().is_empty() {
            return Err(invalid("query must not be empty".to_string()));
        }
        if !(1..=MAX_TOP_K).contains(&args.top_k) {
            return Err(invalid(format!(
                "top_k must be between 1 and {MAX_TOP_K}, got {}",
                args.top_k
            )));
        }
        Ok(args)
    }
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        "vector_search"
    }

    fn description(&self) -> &str {
        "Search stored knowledge by meaning. Input: JSON {\"query\": \"...\", \"top_k\": 5}."
    }

    async fn run(&self, input: ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let args = self.args(input)?;
        let hits = self
            .index
            .search(&ctx.agent_id, &args.query, args.top_k)
            .await?;
        if hits.is_empty() {
            return Ok(format!("No results for: {}", args.query));
        }
        Ok(hits
            .iter()
            .map(|h| format!("{} (score: {:.3})", h.text, h.score))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
