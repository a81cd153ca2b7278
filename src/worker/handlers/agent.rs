//! ReAct agent jobs.

use uuid::Uuid;

use crate::agent::AgentEngine;
use crate::config::AgentConfig;
use crate::error::{Error, LlmError};
use crate::jobs::AgentJob;
use crate::llm::GenerationConfig;
use crate::safety::fallback_response;
use crate::tools::builtin::SummaryTool;
use crate::worker::handlers::{HandlerDeps, JobOutcome};

pub async fn handle(deps: &HandlerDeps, job_id: Uuid, job: AgentJob) -> Result<JobOutcome, Error> {
    let goal = match deps.safety.sanitize(&job.goal) {
        Ok(goal) => goal,
        Err(e) => return Ok(JobOutcome::refused(job_id, &e)),
    };
    let agent_id = job.agent_id.unwrap_or_else(|| format!("agent-{job_id}"));
    run_agent(
        deps,
        job_id,
        &agent_id,
        &goal,
        job.provider.as_deref(),
        job.max_steps,
        job.generation,
    )
    .await
}

/// Run the engine for an already-sanitized goal and shape the result.
/// Answers over `summarize_above_chars` are summarized first.
pub(crate) async fn run_agent(
    deps: &HandlerDeps,
    job_id: Uuid,
    agent_id: &str,
    goal: &str,
    provider: Option<&str>,
    max_steps: Option<u32>,
    generation: GenerationConfig,
) -> Result<JobOutcome, Error> {
    let llm = deps.providers.resolve(provider)?;
    let config = AgentConfig {
        max_steps: max_steps.unwrap_or(deps.agent.max_steps),
        ..deps.agent.clone()
    };
    let engine = AgentEngine::new(
        llm.clone(),
        deps.runner.clone(),
        deps.tools.clone(),
        deps.memory.clone(),
        config,
    )
    .with_generation(generation);

    let mut outcome = engine.run(agent_id, goal).await?;

    let length = outcome.text.chars().count();
    if length > deps.agent.summarize_above_chars {
        match SummaryTool::new(llm, deps.runner.clone())
            .summarize(&outcome.text)
            .await
        {
            Ok(summary) if !summary.is_empty() => {
                tracing::debug!(job_id = %job_id, length, "Summarized long agent answer");
                outcome.text = summary;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Answer summarization failed"),
        }
    }

    if !deps.safety.validate_output(&outcome.text) {
        tracing::info!(job_id = %job_id, "Agent answer failed validation");
        return Ok(JobOutcome::Fallback(fallback_response(&outcome.provider)));
    }
    let value = serde_json::to_value(&outcome).map_err(LlmError::from)?;
    Ok(JobOutcome::Finished(value))
}
