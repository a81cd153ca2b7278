//! libSQL backend for the job store and queue.
//!
//! Status changes are single conditional `UPDATE` statements so the edge
//! check and the write cannot interleave with a concurrent writer. The
//! queue pop is a `DELETE … RETURNING` on the lowest sequence number.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::{JobKind, JobRecord, JobStatus, QueueEntry, StatusUpdate, UpdateOutcome};
use crate::store::migrations;
use crate::store::traits::{JobQueue, JobStore, ZOMBIE_ERROR, zombie_cutoff};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width UTC timestamp so text comparison in SQL orders correctly.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// SQL list of statuses `target` may be reached from, e.g. `'queued'`.
fn sources_sql(target: JobStatus) -> String {
    JobStatus::sources_of(target)
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

const JOB_COLUMNS: &str = "job_id, kind, prompt, model, temperature, top_p, max_tokens, user_id, \
     callback_url, status, result, error, last_heartbeat_at, created_at, started_at, \
     finished_at, updated_at";

fn row_to_job(row: &libsql::Row) -> Result<JobRecord, DatabaseError> {
    let get_text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Serialization(format!("column {i}: {e}")))
    };
    let get_opt = |i: i32| -> Option<String> { row.get::<String>(i).ok() };

    let job_id = Uuid::parse_str(&get_text(0)?)
        .map_err(|e| DatabaseError::Serialization(format!("job_id: {e}")))?;
    let kind: JobKind = get_text(1)?
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let status: JobStatus = get_text(9)?
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let result = match get_opt(10) {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| DatabaseError::Serialization(format!("result: {e}")))?,
        ),
        None => None,
    };
    let number = |i: i32| -> Result<f64, DatabaseError> {
        row.get::<f64>(i)
            .map_err(|e| DatabaseError::Serialization(format!("column {i}: {e}")))
    };
    let max_tokens = row
        .get::<i64>(6)
        .map_err(|e| DatabaseError::Serialization(format!("max_tokens: {e}")))?;

    Ok(JobRecord {
        job_id,
        kind,
        prompt: get_text(2)?,
        model: get_opt(3),
        temperature: number(4)? as f32,
        top_p: number(5)? as f32,
        max_tokens: u32::try_from(max_tokens).unwrap_or(u32::MAX),
        user_id: get_text(7)?,
        callback_url: get_opt(8),
        status,
        result,
        error: get_opt(11),
        last_heartbeat_at: parse_optional_datetime(get_opt(12)),
        created_at: parse_datetime(&get_text(13)?),
        started_at: parse_optional_datetime(get_opt(14)),
        finished_at: parse_optional_datetime(get_opt(15)),
        updated_at: parse_datetime(&get_text(16)?),
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn insert_job(&self, record: &JobRecord) -> Result<(), DatabaseError> {
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("result: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO jobs ({JOB_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    record.job_id.to_string(),
                    record.kind.as_str(),
                    record.prompt.clone(),
                    opt_text(record.model.as_deref()),
                    f64::from(record.temperature),
                    f64::from(record.top_p),
                    i64::from(record.max_tokens),
                    record.user_id.clone(),
                    opt_text(record.callback_url.as_deref()),
                    record.status.as_str(),
                    opt_text(result.as_deref()),
                    opt_text(record.error.as_deref()),
                    opt_text(record.last_heartbeat_at.map(fmt_ts).as_deref()),
                    fmt_ts(record.created_at),
                    opt_text(record.started_at.map(fmt_ts).as_deref()),
                    opt_text(record.finished_at.map(fmt_ts).as_deref()),
                    fmt_ts(record.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;

        debug!(job_id = %record.job_id, kind = %record.kind, "Job inserted");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<UpdateOutcome, DatabaseError> {
        let sources = sources_sql(update.status);
        let at = fmt_ts(update.at);

        let affected = if sources.is_empty() {
            0
        } else if update.status == JobStatus::Running {
            self.conn()
                .execute(
                    &format!(
                        "UPDATE jobs SET status = ?1, started_at = COALESCE(started_at, ?2), \
                         last_heartbeat_at = ?2, updated_at = ?2 \
                         WHERE job_id = ?3 AND status IN ({sources})"
                    ),
                    params![update.status.as_str(), at, id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?
        } else {
            let result = update
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| DatabaseError::Serialization(format!("result: {e}")))?;
            self.conn()
                .execute(
                    &format!(
                        "UPDATE jobs SET status = ?1, result = ?2, error = ?3, \
                         finished_at = ?4, updated_at = ?4 \
                         WHERE job_id = ?5 AND status IN ({sources})"
                    ),
                    params![
                        update.status.as_str(),
                        opt_text(result.as_deref()),
                        opt_text(update.error.as_deref()),
                        at,
                        id.to_string()
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?
        };

        let current = self.get_job(id).await?;
        Ok(match current {
            None => UpdateOutcome::Missing,
            Some(record) if affected > 0 => {
                debug!(job_id = %id, status = %record.status, "Job status updated");
                UpdateOutcome::Applied(record)
            }
            Some(record) => UpdateOutcome::Rejected {
                current: record.status,
            },
        })
    }

    async fn heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET last_heartbeat_at = ?1 WHERE job_id = ?2 AND status = 'running'",
                params![fmt_ts(at), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("heartbeat: {e}")))?;
        Ok(affected > 0)
    }

    async fn reclaim_zombies(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let cutoff = fmt_ts(zombie_cutoff(now, timeout));
        let now = fmt_ts(now);
        let mut rows = self
            .conn()
            .query(
                "UPDATE jobs SET status = 'failed', result = NULL, error = ?1, \
                 finished_at = ?2, updated_at = ?2 \
                 WHERE status = 'running' \
                 AND (COALESCE(last_heartbeat_at, started_at) IS NULL \
                      OR COALESCE(last_heartbeat_at, started_at) < ?3) \
                 RETURNING job_id",
                params![ZOMBIE_ERROR, now, cutoff],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reclaim_zombies: {e}")))?;

        let mut reclaimed = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("reclaim_zombies: {e}")))?
        {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("reclaim_zombies row: {e}")))?;
            let id = Uuid::parse_str(&raw)
                .map_err(|e| DatabaseError::Serialization(format!("job_id: {e}")))?;
            reclaimed.push(id);
        }
        Ok(reclaimed)
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at ASC"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_status: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_status: {e}")))?
        {
            records.push(row_to_job(&row)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl JobQueue for LibSqlBackend {
    async fn push(&self, entry: &QueueEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO job_queue (job_id, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                params![entry.job_id.to_string(), entry.payload.clone(), fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("queue push: {e}")))?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<QueueEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "DELETE FROM job_queue WHERE seq = (SELECT MIN(seq) FROM job_queue) \
                 RETURNING job_id, payload",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("queue pop: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("queue pop: {e}")))?
        else {
            return Ok(None);
        };
        let raw_id: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("queue pop row: {e}")))?;
        let payload: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("queue pop row: {e}")))?;
        let job_id = Uuid::parse_str(&raw_id)
            .map_err(|e| DatabaseError::Serialization(format!("job_id: {e}")))?;
        Ok(Some(QueueEntry { job_id, payload }))
    }

    async fn len(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM job_queue", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("queue len: {e}")))?;
        let count = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("queue len: {e}")))?
        {
            Some(row) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("queue len row: {e}")))?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{AgentJob, JobPayload, JobSubmission};
    use crate::llm::GenerationConfig;
    use serde_json::json;

    fn submission(goal: &str) -> JobSubmission {
        JobSubmission {
            payload: JobPayload::Agent(AgentJob {
                goal: goal.into(),
                agent_id: None,
                provider: Some("mock".into()),
                max_steps: Some(2),
                generation: GenerationConfig::default(),
            }),
            user_id: "user-1".into(),
            callback_url: Some("http://localhost/cb".into()),
        }
    }

    async fn enqueue(db: &LibSqlBackend, goal: &str) -> JobRecord {
        let (record, entry) = JobRecord::from_submission(&submission(goal)).unwrap();
        db.insert_job(&record).await.unwrap();
        db.push(&entry).await.unwrap();
        record
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let record = enqueue(&db, "find X").await;

        let stored = db.get_job(record.job_id).await.unwrap().unwrap();
        assert_eq!(stored.job_id, record.job_id);
        assert_eq!(stored.kind, JobKind::Agent);
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.prompt, record.prompt);
        assert_eq!(stored.callback_url.as_deref(), Some("http://localhost/cb"));
        assert!((stored.temperature - 0.7).abs() < 1e-6);
        assert!(stored.result.is_none());

        assert!(db.get_job(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_pops_oldest_first() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let a = enqueue(&db, "a").await;
        let b = enqueue(&db, "b").await;
        assert_eq!(db.len().await.unwrap(), 2);

        let first = db.pop().await.unwrap().unwrap();
        assert_eq!(first.job_id, a.job_id);
        assert_eq!(first.decode().unwrap().kind(), JobKind::Agent);
        assert_eq!(db.pop().await.unwrap().unwrap().job_id, b.job_id);
        assert!(db.pop().await.unwrap().is_none());
        assert_eq!(db.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_lifecycle_and_rejection() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let record = enqueue(&db, "a").await;

        let early = db
            .update_status(record.job_id, StatusUpdate::finished(json!({})))
            .await
            .unwrap();
        assert_eq!(
            early,
            UpdateOutcome::Rejected {
                current: JobStatus::Queued
            }
        );

        let running = db
            .update_status(record.job_id, StatusUpdate::running())
            .await
            .unwrap();
        let UpdateOutcome::Applied(running) = running else {
            panic!("expected running update to apply");
        };
        assert!(running.started_at.is_some());
        assert!(running.last_heartbeat_at.is_some());

        let done = db
            .update_status(
                record.job_id,
                StatusUpdate::finished(json!({"text": "Stopped", "finish_reason": "stopped"})),
            )
            .await
            .unwrap();
        let UpdateOutcome::Applied(done) = done else {
            panic!("expected finished update to apply");
        };
        assert_eq!(done.status, JobStatus::Finished);
        assert_eq!(done.result.unwrap()["text"], "Stopped");
        assert!(done.error.is_none());
        assert!(done.finished_at.is_some());

        assert!(!db.heartbeat(record.job_id, Utc::now()).await.unwrap());
        let missing = db
            .update_status(Uuid::new_v4(), StatusUpdate::failed("x"))
            .await
            .unwrap();
        assert_eq!(missing, UpdateOutcome::Missing);
    }

    #[tokio::test]
    async fn zombies_reclaimed_once() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let stale = enqueue(&db, "stale").await;
        let fresh = enqueue(&db, "fresh").await;
        let t0 = Utc::now();

        db.update_status(stale.job_id, StatusUpdate::running().at(t0))
            .await
            .unwrap();
        db.update_status(fresh.job_id, StatusUpdate::running().at(t0))
            .await
            .unwrap();
        assert!(
            db.heartbeat(fresh.job_id, t0 + chrono::Duration::seconds(200))
                .await
                .unwrap()
        );

        let now = t0 + chrono::Duration::seconds(400);
        let timeout = Duration::from_secs(300);
        let reclaimed = db.reclaim_zombies(now, timeout).await.unwrap();
        assert_eq!(reclaimed, vec![stale.job_id]);
        assert!(db.reclaim_zombies(now, timeout).await.unwrap().is_empty());

        let record = db.get_job(stale.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(ZOMBIE_ERROR));

        let running = db.list_by_status(JobStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, fresh.job_id);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        let id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            enqueue(&db, "durable").await.job_id
        };

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let stored = db.get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(db.pop().await.unwrap().unwrap().job_id, id);
    }
}
