//! In-memory store and queue, used by tests and embedded setups.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::{JobRecord, JobStatus, QueueEntry, StatusUpdate, UpdateOutcome};
use crate::store::traits::{JobQueue, JobStore, ZOMBIE_ERROR, zombie_cutoff};

/// Job records and queue held behind async locks.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    queue: RwLock<VecDeque<QueueEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, record: &JobRecord) -> Result<(), DatabaseError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&record.job_id) {
            return Err(DatabaseError::Query(format!(
                "insert_job: duplicate id {}",
                record.job_id
            )));
        }
        jobs.insert(record.job_id, record.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobRecord>, DatabaseError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<UpdateOutcome, DatabaseError> {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if !record.status.can_transition_to(update.status) {
            return Ok(UpdateOutcome::Rejected {
                current: record.status,
            });
        }
        record.apply(&update);
        Ok(UpdateOutcome::Applied(record.clone()))
    }

    async fn heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(record) if record.status == JobStatus::Running => {
                record.last_heartbeat_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_zombies(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let cutoff = zombie_cutoff(now, timeout);
        let mut jobs = self.jobs.write().await;
        let mut reclaimed = Vec::new();
        for record in jobs.values_mut() {
            let stale = record.liveness_at().is_none_or(|t| t < cutoff);
            if record.status == JobStatus::Running && stale {
                record.apply(&StatusUpdate::failed(ZOMBIE_ERROR).at(now));
                reclaimed.push(record.job_id);
            }
        }
        Ok(reclaimed)
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, DatabaseError> {
        let mut records: Vec<JobRecord> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[async_trait]
impl JobQueue for InMemoryStore {
    async fn push(&self, entry: &QueueEntry) -> Result<(), DatabaseError> {
        self.queue.write().await.push_back(entry.clone());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<QueueEntry>, DatabaseError> {
        Ok(self.queue.write().await.pop_front())
    }

    async fn len(&self) -> Result<usize, DatabaseError> {
        Ok(self.queue.read().await.len())
    }
}
