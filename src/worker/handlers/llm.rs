//! Single-shot LLM jobs.

use uuid::Uuid;

use crate::error::Error;
use crate::jobs::LlmJob;
use crate::llm::CompletionRequest;
use crate::worker::handlers::{HandlerDeps, JobOutcome, validated};

pub async fn handle(deps: &HandlerDeps, job_id: Uuid, job: LlmJob) -> Result<JobOutcome, Error> {
    let prompt = match deps.safety.sanitize(&job.prompt) {
        Ok(prompt) => prompt,
        Err(e) => return Ok(JobOutcome::refused(job_id, &e)),
    };
    let instruction = match job.instruction.as_deref().map(|i| deps.safety.sanitize(i)) {
        Some(Err(e)) => return Ok(JobOutcome::refused(job_id, &e)),
        Some(Ok(instruction)) => Some(instruction),
        None => None,
    };

    let provider = deps.providers.resolve(job.provider.as_deref())?;
    let mut request = CompletionRequest::new(prompt).with_config(job.generation);
    if let Some(instruction) = instruction.filter(|i| !i.is_empty()) {
        request = request.with_instruction(instruction);
    }

    tracing::debug!(job_id = %job_id, provider = %provider.provider_name(), "Running LLM job");
    let response = deps.runner.run(provider.as_ref(), request).await?;
    validated(&deps.safety, job_id, &response)
}
