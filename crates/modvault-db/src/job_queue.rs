//! Durable virus scan queue backed by the `scan_jobs` table.
//!
//! Submitting only records a pending row. A scanner process claims jobs one
//! at a time and reports the verdict back through [`SqliteJobQueue::complete`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use modvault_core::{JobQueue, QueueError, RecordError, RecordResult};

use crate::record_store::{db_error, SqliteRecordStore};

/// Lifecycle of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

/// A queued scan request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub id: i64,
    pub mod_id: String,
    pub version_id: String,
    pub notify_on_result: bool,
    pub status: JobStatus,
}

const JOB_COLUMNS: &str = "id, mod_id, version_id, notify_on_result, status";

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanJob> {
    let status: String = row.get(4)?;
    let status = JobStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown job status '{}'", status).into(),
        )
    })?;
    Ok(ScanJob {
        id: row.get(0)?,
        mod_id: row.get(1)?,
        version_id: row.get(2)?,
        notify_on_result: row.get::<_, i64>(3)? != 0,
        status,
    })
}

/// SQLite-backed scan queue.
#[derive(Clone)]
pub struct SqliteJobQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobQueue {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Pending jobs, oldest first.
    pub fn pending_jobs(&self) -> RecordResult<Vec<ScanJob>> {
        let conn = SqliteRecordStore::lock(&self.conn)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM scan_jobs WHERE status = 'pending' ORDER BY id",
                JOB_COLUMNS
            ))
            .map_err(db_error)?;
        let rows = stmt.query_map([], job_from_row).map_err(db_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_error)
    }

    pub fn get_job(&self, id: i64) -> RecordResult<Option<ScanJob>> {
        let conn = SqliteRecordStore::lock(&self.conn)?;
        conn.query_row(
            &format!("SELECT {} FROM scan_jobs WHERE id = ?1", JOB_COLUMNS),
            [id],
            job_from_row,
        )
        .optional()
        .map_err(db_error)
    }

    /// Atomically move the oldest pending job to `running`.
    pub fn claim_next(&self) -> RecordResult<Option<ScanJob>> {
        let conn = SqliteRecordStore::lock(&self.conn)?;

        conn.execute("BEGIN IMMEDIATE", []).map_err(db_error)?;
        let claimed = (|| -> rusqlite::Result<Option<ScanJob>> {
            let job = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM scan_jobs WHERE status = 'pending' ORDER BY id LIMIT 1",
                        JOB_COLUMNS
                    ),
                    [],
                    job_from_row,
                )
                .optional()?;
            let Some(mut job) = job else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE scan_jobs SET status = 'running' WHERE id = ?1",
                [job.id],
            )?;
            job.status = JobStatus::Running;
            Ok(Some(job))
        })();

        match claimed {
            Ok(job) => {
                conn.execute("COMMIT", []).map_err(db_error)?;
                Ok(job)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(db_error(e))
            }
        }
    }

    /// Record a scan verdict for a running job.
    pub fn complete(&self, id: i64, passed: bool) -> RecordResult<()> {
        let status = if passed {
            JobStatus::Passed
        } else {
            JobStatus::Failed
        };
        let conn = SqliteRecordStore::lock(&self.conn)?;
        let updated = conn
            .execute(
                "UPDATE scan_jobs SET status = ?2, finished_at = ?3 WHERE id = ?1 AND status = 'running'",
                params![id, status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(db_error)?;
        if updated == 0 {
            return Err(RecordError::NotFound {
                entity: "running scan job",
                id: id.to_string(),
            });
        }
        info!(job_id = id, status = status.as_str(), "scan job finished");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn submit_virus_scan(
        &self,
        mod_id: &str,
        version_id: &str,
        notify_on_result: bool,
    ) -> Result<(), QueueError> {
        let unavailable = |e: RecordError| QueueError::Unavailable {
            message: e.to_string(),
        };
        let conn = SqliteRecordStore::lock(&self.conn).map_err(unavailable)?;
        conn.execute(
            "INSERT INTO scan_jobs (mod_id, version_id, notify_on_result, submitted_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                mod_id,
                version_id,
                notify_on_result as i32,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| unavailable(db_error(e)))?;
        debug!(mod_id, version_id, "scan job queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SqliteJobQueue {
        SqliteRecordStore::memory().unwrap().job_queue()
    }

    #[tokio::test]
    async fn test_submit_records_pending_job() {
        let queue = queue();
        queue.submit_virus_scan("m1", "v1", true).await.unwrap();

        let jobs = queue.pending_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].version_id, "v1");
        assert!(jobs[0].notify_on_result);
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let queue = queue();
        queue.submit_virus_scan("m1", "v1", true).await.unwrap();
        queue.submit_virus_scan("m1", "v2", false).await.unwrap();

        let first = queue.claim_next().unwrap().unwrap();
        assert_eq!(first.version_id, "v1");
        assert_eq!(first.status, JobStatus::Running);

        let second = queue.claim_next().unwrap().unwrap();
        assert_eq!(second.version_id, "v2");
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_running_job() {
        let queue = queue();
        queue.submit_virus_scan("m1", "v1", true).await.unwrap();
        let pending = queue.pending_jobs().unwrap()[0].id;

        assert!(queue.complete(pending, true).is_err());

        let job = queue.claim_next().unwrap().unwrap();
        queue.complete(job.id, false).unwrap();
        let done = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.status.is_finished());
    }

    #[test]
    fn test_status_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Passed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }
}
