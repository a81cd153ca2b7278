//! Job domain: records, typed payloads, status machine and submission.

pub mod model;
pub mod repository;
pub mod status;

pub use model::{
    AgentJob, JobKind, JobPayload, JobRecord, JobSubmission, JobView, LlmJob, OrchestratedJob,
    QueueEntry, StatusUpdate, UpdateOutcome,
};
pub use repository::JobRepository;
pub use status::JobStatus;
