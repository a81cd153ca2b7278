//! Per-job liveness heartbeat.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::JobStore;

/// Shortest interval the heartbeat timer accepts.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn a task that stamps `last_heartbeat_at` every `interval`,
/// clamped to at least [`MIN_HEARTBEAT_INTERVAL`].
///
/// The task ends when `token` is cancelled or when the store reports the
/// job is no longer running. Store errors are logged and the next tick
/// tries again.
pub fn spawn_heartbeat(
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The running transition already stamped liveness.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match store.heartbeat(job_id, Utc::now()).await {
                        Ok(true) => tracing::trace!(job_id = %job_id, "Heartbeat"),
                        Ok(false) => {
                            tracing::debug!(job_id = %job_id, "Job left running, stopping heartbeat");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Heartbeat write failed");
                        }
                    }
                }
            }
        }
    })
}
