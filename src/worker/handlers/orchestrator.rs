//! Complexity-routed jobs: classify, then answer directly or run an agent.

use std::fmt;

use uuid::Uuid;

use crate::error::Error;
use crate::jobs::OrchestratedJob;
use crate::llm::{CompletionRequest, GenerationConfig, LlmProvider, LlmRunner};
use crate::worker::handlers::agent::run_agent;
use crate::worker::handlers::{HandlerDeps, JobOutcome, validated};

pub const CLASSIFIER_PROMPT: &str = "You are a query complexity classifier for an LLM system router.

Classify the user query into one of two categories:

SIMPLE - The query can be answered in a single LLM call without tools, \
multi-step reasoning, or external data retrieval.

COMPLEX - The query requires any of: multi-step reasoning, conditional logic, \
comparison of multiple entities with structured output, document or file analysis, \
tool usage, external data retrieval, planning or decomposition into steps.

Return exactly one word: SIMPLE or COMPLEX. Do not explain your answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
        })
    }
}

/// Ask the provider to classify `query`. Any reply other than `SIMPLE`,
/// and any failure, counts as complex.
pub async fn classify(
    provider: &dyn LlmProvider,
    runner: &LlmRunner,
    query: &str,
    generation: GenerationConfig,
) -> Complexity {
    let request = CompletionRequest::new(query)
        .with_config(generation)
        .with_instruction(CLASSIFIER_PROMPT);
    match runner.run(provider, request).await {
        Ok(response) if response.text.trim().eq_ignore_ascii_case("SIMPLE") => Complexity::Simple,
        Ok(_) => Complexity::Complex,
        Err(e) => {
            tracing::warn!(error = %e, "Classifier call failed, routing as complex");
            Complexity::Complex
        }
    }
}

pub async fn handle(
    deps: &HandlerDeps,
    job_id: Uuid,
    job: OrchestratedJob,
) -> Result<JobOutcome, Error> {
    let query = match deps.safety.sanitize(&job.query) {
        Ok(query) => query,
        Err(e) => return Ok(JobOutcome::refused(job_id, &e)),
    };
    let provider = deps.providers.resolve(job.provider.as_deref())?;

    let complexity = classify(provider.as_ref(), &deps.runner, &query, job.generation).await;
    tracing::info!(job_id = %job_id, complexity = %complexity, "Routed query");

    match complexity {
        Complexity::Simple => {
            let request = CompletionRequest::new(query).with_config(job.generation);
            let response = deps.runner.run(provider.as_ref(), request).await?;
            validated(&deps.safety, job_id, &response)
        }
        Complexity::Complex => {
            let agent_id = job.agent_id.unwrap_or_else(|| format!("smart-{job_id}"));
            run_agent(
                deps,
                job_id,
                &agent_id,
                &query,
                job.provider.as_deref(),
                job.max_steps,
                job.generation,
            )
            .await
        }
    }
}
