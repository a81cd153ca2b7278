//! Job handlers, one per job kind.
//!
//! Dispatch is a `match` on the decoded [`JobPayload`]; there is no
//! handler list to search. Handlers return a [`JobOutcome`] and never write
//! job status themselves: the worker persists the outcome.

pub mod agent;
pub mod llm;
pub mod orchestrator;

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::agent::AgentMemory;
use crate::config::AgentConfig;
use crate::error::{Error, LlmError, SafetyError};
use crate::jobs::{JobPayload, JobStatus, StatusUpdate};
use crate::llm::{LlmResponse, LlmRunner, ProviderRegistry};
use crate::safety::{SafetyLayer, fallback_response, refusal_response};
use crate::tools::ToolRegistry;

/// Shared collaborators injected into every handler.
#[derive(Clone)]
pub struct HandlerDeps {
    pub providers: Arc<ProviderRegistry>,
    pub runner: LlmRunner,
    pub tools: Arc<ToolRegistry>,
    pub memory: Arc<dyn AgentMemory>,
    pub safety: Arc<SafetyLayer>,
    pub agent: AgentConfig,
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished(Value),
    Refused(Value),
    Fallback(Value),
    Failed(String),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Finished(_) => JobStatus::Finished,
            Self::Refused(_) => JobStatus::Refused,
            Self::Fallback(_) => JobStatus::Fallback,
            Self::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn into_update(self) -> StatusUpdate {
        match self {
            Self::Finished(v) => StatusUpdate::finished(v),
            Self::Refused(v) => StatusUpdate::refused(v),
            Self::Fallback(v) => StatusUpdate::fallback(v),
            Self::Failed(e) => StatusUpdate::failed(e),
        }
    }

    pub(crate) fn refused(job_id: Uuid, reason: &SafetyError) -> Self {
        tracing::info!(job_id = %job_id, reason = %reason, "Input refused");
        Self::Refused(refusal_response(reason))
    }
}

/// Routes decoded payloads to their handler.
pub struct JobDispatcher {
    deps: HandlerDeps,
}

impl JobDispatcher {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &HandlerDeps {
        &self.deps
    }

    /// Run the handler for `payload`. Handler errors become `Failed`.
    pub async fn dispatch(&self, job_id: Uuid, payload: JobPayload) -> JobOutcome {
        let kind = payload.kind();
        let result = match payload {
            JobPayload::Llm(job) => llm::handle(&self.deps, job_id, job).await,
            JobPayload::Agent(job) => agent::handle(&self.deps, job_id, job).await,
            JobPayload::Orchestrated(job) => orchestrator::handle(&self.deps, job_id, job).await,
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(job_id = %job_id, kind = %kind, error = %e, "Handler failed");
            JobOutcome::Failed(e.to_string())
        })
    }
}

/// Finish with the normalized response, or fall back when it fails
/// output validation.
pub(crate) fn validated(
    safety: &SafetyLayer,
    job_id: Uuid,
    response: &LlmResponse,
) -> Result<JobOutcome, Error> {
    if !safety.validate_output(&response.text) {
        tracing::info!(job_id = %job_id, provider = %response.provider, "Output failed validation");
        return Ok(JobOutcome::Fallback(fallback_response(&response.provider)));
    }
    let value = serde_json::to_value(response).map_err(LlmError::from)?;
    Ok(JobOutcome::Finished(value))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::jobs::LlmJob;
    use crate::llm::GenerationConfig;

    #[tokio::test]
    async fn unknown_provider_fails_the_job() {
        let dispatcher = JobDispatcher::new(deps(Arc::new(RoutedProvider::new("hi"))));
        let outcome = dispatcher
            .dispatch(
                Uuid::new_v4(),
                JobPayload::Llm(LlmJob {
                    prompt: "hello".into(),
                    instruction: None,
                    provider: Some("missing".into()),
                    generation: GenerationConfig::default(),
                }),
            )
            .await;
        match outcome {
            JobOutcome::Failed(error) => assert!(error.contains("missing"), "{error}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn outcome_maps_to_terminal_update() {
        let update = JobOutcome::Failed("x".into()).into_update();
        assert_eq!(update.status, JobStatus::Failed);
        assert_eq!(update.error.as_deref(), Some("x"));
        assert!(JobOutcome::Fallback(Value::Null).status().is_terminal());
    }
}
