//! Producer-facing job operations: submit and query.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{DatabaseError, Error};
use crate::jobs::model::{JobRecord, JobSubmission, JobView};
use crate::store::{JobQueue, JobStore};

/// Submission and status queries over a store and queue.
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
}

impl JobRepository {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Create a queued job and push it onto the queue.
    ///
    /// The record is written before the queue entry, so a worker never
    /// dequeues an id it cannot look up.
    pub async fn create_job(&self, submission: JobSubmission) -> Result<Uuid, Error> {
        let (record, entry) = JobRecord::from_submission(&submission)
            .map_err(|e| DatabaseError::Serialization(format!("job payload: {e}")))?;
        self.store.insert_job(&record).await?;
        self.queue.push(&entry).await?;
        info!(
            job_id = %record.job_id,
            kind = %record.kind,
            user_id = %record.user_id,
            "Job enqueued"
        );
        Ok(record.job_id)
    }

    /// Status, result and error of a job, or `None` if unknown.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobView>, Error> {
        Ok(self.store.get_job(job_id).await?.map(|r| r.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobPayload, JobStatus, LlmJob};
    use crate::llm::GenerationConfig;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn create_then_get() {
        let store = Arc::new(InMemoryStore::new());
        let repo = JobRepository::new(store.clone(), store.clone());

        let id = repo
            .create_job(JobSubmission {
                payload: JobPayload::Llm(LlmJob {
                    prompt: "hello".into(),
                    instruction: None,
                    provider: None,
                    generation: GenerationConfig::default(),
                }),
                user_id: "u".into(),
                callback_url: None,
            })
            .await
            .unwrap();

        let view = repo.get_job(id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(repo.get_job(Uuid::new_v4()).await.unwrap().is_none());
    }
}
