//! Job records, typed payloads and queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::jobs::status::JobStatus;
use crate::llm::GenerationConfig;

/// Discriminator stored alongside every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Single-shot generation.
    Llm,
    /// Multi-step ReAct agent run.
    Agent,
    /// Classified first, then answered directly or by an agent.
    Orchestrated,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Agent => "agent",
            Self::Orchestrated => "orchestrated",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(Self::Llm),
            "agent" => Ok(Self::Agent),
            "orchestrated" => Ok(Self::Orchestrated),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Single-shot generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmJob {
    pub prompt: String,
    #[serde(default)]
    pub instruction: Option<String>,
    /// Provider name; the registry default when absent.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// ReAct agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentJob {
    pub goal: String,
    /// Memory scope; defaults to `agent-{job_id}`.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    /// Overrides the configured step budget.
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Query routed by complexity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratedJob {
    pub query: String,
    /// Memory scope for the agent route; defaults to `smart-{job_id}`.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Typed job payload. The serialized form carries a `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Llm(LlmJob),
    Agent(AgentJob),
    Orchestrated(OrchestratedJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Llm(_) => JobKind::Llm,
            Self::Agent(_) => JobKind::Agent,
            Self::Orchestrated(_) => JobKind::Orchestrated,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Llm(job) => job.provider.as_deref(),
            Self::Agent(job) => job.provider.as_deref(),
            Self::Orchestrated(job) => job.provider.as_deref(),
        }
    }

    pub fn generation(&self) -> &GenerationConfig {
        match self {
            Self::Llm(job) => &job.generation,
            Self::Agent(job) => &job.generation,
            Self::Orchestrated(job) => &job.generation,
        }
    }
}

/// What a producer hands to [`JobRepository::create_job`](crate::jobs::JobRepository::create_job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub payload: JobPayload,
    pub user_id: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// The canonical stored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub kind: JobKind,
    /// JSON encoding of the [`JobPayload`].
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub user_id: String,
    pub callback_url: Option<String>,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Build a queued record and its queue entry from a submission.
    pub fn from_submission(
        submission: &JobSubmission,
    ) -> Result<(JobRecord, QueueEntry), serde_json::Error> {
        let job_id = Uuid::new_v4();
        let payload = serde_json::to_string(&submission.payload)?;
        let generation = submission.payload.generation();
        let now = Utc::now();
        let record = JobRecord {
            job_id,
            kind: submission.payload.kind(),
            prompt: payload.clone(),
            model: submission.payload.provider().map(String::from),
            temperature: generation.temperature,
            top_p: generation.top_p,
            max_tokens: generation.max_tokens,
            user_id: submission.user_id.clone(),
            callback_url: submission.callback_url.clone(),
            status: JobStatus::Queued,
            result: None,
            error: None,
            last_heartbeat_at: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        };
        Ok((record, QueueEntry { job_id, payload }))
    }

    /// Apply an already-validated status update in place.
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        self.updated_at = update.at;
        match update.status {
            JobStatus::Running => {
                self.started_at.get_or_insert(update.at);
                self.last_heartbeat_at = Some(update.at);
            }
            s if s.is_terminal() => {
                self.finished_at = Some(update.at);
                self.result = update.result.clone();
                self.error = update.error.clone();
            }
            _ => {}
        }
    }

    /// Timestamp the zombie sweep measures staleness from.
    pub fn liveness_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat_at.or(self.started_at)
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.job_id,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Entry in the FIFO queue. The payload stays encoded until a worker
/// decodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: Uuid,
    pub payload: String,
}

impl QueueEntry {
    pub fn decode(&self) -> Result<JobPayload, JobError> {
        serde_json::from_str(&self.payload).map_err(|e| JobError::InvalidPayload {
            id: self.job_id,
            reason: e.to_string(),
        })
    }
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    fn new(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn running() -> Self {
        Self::new(JobStatus::Running)
    }

    pub fn finished(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::new(JobStatus::Finished)
        }
    }

    pub fn refused(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::new(JobStatus::Refused)
        }
    }

    pub fn fallback(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::new(JobStatus::Fallback)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(JobStatus::Failed)
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Outcome of an atomic status update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied(JobRecord),
    /// No record with that id; nothing was written.
    Missing,
    /// The edge is not allowed from the current status.
    Rejected { current: JobStatus },
}

/// What the status API exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
