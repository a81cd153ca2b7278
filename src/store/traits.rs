//! Storage traits for job records and the pending-job queue.
//!
//! The store and the queue are separate seams: a record may exist without
//! a queue entry, and the libSQL backend implements both on one connection.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::{JobRecord, JobStatus, QueueEntry, StatusUpdate, UpdateOutcome};

/// Error string written by the zombie sweep.
pub const ZOMBIE_ERROR: &str = "zombie job";

/// Durable mapping from job id to job record.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record.
    async fn insert_job(&self, record: &JobRecord) -> Result<(), DatabaseError>;

    /// Get a record by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<JobRecord>, DatabaseError>;

    /// Atomically check the transition edge and apply the update.
    async fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<UpdateOutcome, DatabaseError>;

    /// Record liveness for a running job. Returns `false` once the job is
    /// no longer running, in which case nothing was written.
    async fn heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Fail every running job whose last heartbeat (or start, if it never
    /// beat) is older than `now - timeout`. Returns the ids reclaimed by
    /// this call; a job is never reclaimed twice.
    async fn reclaim_zombies(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Uuid>, DatabaseError>;

    /// List records in a given status, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, DatabaseError>;
}

/// FIFO of pending job payloads.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append an entry.
    async fn push(&self, entry: &QueueEntry) -> Result<(), DatabaseError>;

    /// Pop the oldest entry without blocking.
    async fn pop(&self) -> Result<Option<QueueEntry>, DatabaseError>;

    /// Number of pending entries.
    async fn len(&self) -> Result<usize, DatabaseError>;
}

/// Cutoff before which a running job counts as a zombie.
pub(crate) fn zombie_cutoff(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    now.checked_sub_signed(timeout)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
