//! Poll loop: sweep zombies, dequeue, spawn one task per job.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::DatabaseError;
use crate::jobs::{JobView, QueueEntry, StatusUpdate, UpdateOutcome};
use crate::store::{JobQueue, JobStore};
use crate::worker::callback::CallbackNotifier;
use crate::worker::handlers::{JobDispatcher, JobOutcome};
use crate::worker::heartbeat::spawn_heartbeat;

/// Error recorded when a payload cannot be routed to any handler.
pub const NO_HANDLER_ERROR: &str = "no handler found";

/// Everything a spawned job task needs. Cheap to clone.
#[derive(Clone)]
struct JobTask {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<JobDispatcher>,
    callbacks: CallbackNotifier,
    config: WorkerConfig,
}

/// Dequeues jobs and runs them concurrently.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    task: JobTask,
    in_flight: HashMap<Uuid, JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        dispatcher: Arc<JobDispatcher>,
    ) -> Self {
        Self {
            queue,
            task: JobTask {
                store,
                dispatcher,
                callbacks: CallbackNotifier::default(),
                config,
            },
            in_flight: HashMap::new(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: CallbackNotifier) -> Self {
        self.task.callbacks = callbacks;
        self
    }

    /// Number of job tasks not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Poll until `shutdown` is cancelled, then wait for in-flight jobs.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval = ?self.task.config.poll_interval,
            zombie_timeout = ?self.task.config.zombie_timeout,
            "Worker started"
        );

        while !shutdown.is_cancelled() {
            self.reap();
            let spawned = match self.poll_once().await {
                Ok(spawned) => spawned,
                Err(e) => {
                    tracing::error!(error = %e, "Poll cycle failed");
                    false
                }
            };
            if !spawned {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.task.config.poll_interval) => {}
                }
            }
        }

        tracing::info!(in_flight = self.in_flight.len(), "Worker stopping, draining jobs");
        self.drain().await;
        tracing::info!("Worker stopped");
    }

    /// One cycle: sweep zombies, then dequeue and spawn at most one job.
    /// Returns whether a job was spawned.
    pub async fn poll_once(&mut self) -> Result<bool, DatabaseError> {
        self.sweep_zombies().await;
        let Some(entry) = self.queue.pop().await? else {
            return Ok(false);
        };
        self.spawn_job(entry);
        Ok(true)
    }

    /// Fail running jobs whose heartbeat is older than the zombie timeout.
    pub async fn sweep_zombies(&self) -> Vec<Uuid> {
        match self
            .task
            .store
            .reclaim_zombies(Utc::now(), self.task.config.zombie_timeout)
            .await
        {
            Ok(ids) => {
                for id in &ids {
                    tracing::warn!(job_id = %id, "Reclaimed zombie job");
                }
                ids
            }
            Err(e) => {
                tracing::error!(error = %e, "Zombie sweep failed");
                Vec::new()
            }
        }
    }

    fn spawn_job(&mut self, entry: QueueEntry) {
        let job_id = entry.job_id;
        let task = self.task.clone();
        let handle = tokio::spawn(async move { task.execute(entry).await });
        if let Some(previous) = self.in_flight.insert(job_id, handle) {
            tracing::warn!(job_id = %job_id, finished = previous.is_finished(), "Job dequeued twice");
        }
    }

    /// Drop handles of finished job tasks.
    pub fn reap(&mut self) {
        self.in_flight.retain(|_, handle| !handle.is_finished());
    }

    /// Wait for every in-flight job task.
    pub async fn drain(&mut self) {
        let handles: Vec<JoinHandle<()>> = self.in_flight.drain().map(|(_, h)| h).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Job task did not complete");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl JobTask {
    async fn execute(self, entry: QueueEntry) {
        let job_id = entry.job_id;
        let record = match self
            .store
            .update_status(job_id, StatusUpdate::running())
            .await
        {
            Ok(UpdateOutcome::Applied(record)) => record,
            Ok(UpdateOutcome::Missing) => {
                tracing::warn!(job_id = %job_id, "Dequeued job has no record, skipping");
                return;
            }
            Ok(UpdateOutcome::Rejected { current }) => {
                tracing::warn!(job_id = %job_id, status = %current, "Dequeued job is not queued, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job running");
                return;
            }
        };

        let token = CancellationToken::new();
        let heartbeat = spawn_heartbeat(
            self.store.clone(),
            job_id,
            self.config.heartbeat_interval,
            token.clone(),
        );
        let guard = token.drop_guard();

        let outcome = match entry.decode() {
            Ok(payload) => {
                tracing::info!(job_id = %job_id, kind = %payload.kind(), "Job started");
                let dispatch = self.dispatcher.dispatch(job_id, payload);
                match AssertUnwindSafe(dispatch).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(job_id = %job_id, panic = %message, "Handler panicked");
                        JobOutcome::Failed(format!("handler panicked: {message}"))
                    }
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Undecodable payload");
                JobOutcome::Failed(NO_HANDLER_ERROR.to_string())
            }
        };

        let view = self.persist(job_id, outcome).await;

        drop(guard);
        if let Err(e) = heartbeat.await {
            tracing::warn!(job_id = %job_id, error = %e, "Heartbeat task did not complete");
        }

        if let (Some(url), Some(view)) = (record.callback_url.as_deref(), view) {
            match self.callbacks.notify(url, &view).await {
                Ok(()) => tracing::debug!(job_id = %job_id, "Callback delivered"),
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Callback failed"),
            }
        }
    }

    async fn persist(&self, job_id: Uuid, outcome: JobOutcome) -> Option<JobView> {
        let status = outcome.status();
        match self
            .store
            .update_status(job_id, outcome.into_update())
            .await
        {
            Ok(UpdateOutcome::Applied(record)) => {
                tracing::info!(job_id = %job_id, status = %record.status, "Job completed");
                Some(record.view())
            }
            Ok(UpdateOutcome::Rejected { current }) => {
                tracing::warn!(
                    job_id = %job_id,
                    status = %status,
                    current = %current,
                    "Terminal write rejected"
                );
                None
            }
            Ok(UpdateOutcome::Missing) => {
                tracing::warn!(job_id = %job_id, "Job record vanished before completion");
                None
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist job outcome");
                None
            }
        }
    }
}
