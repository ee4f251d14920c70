//! Sync jobs and their append-only event stream.

use super::{parse_column, EventType, JobReport, JobStatus, JobStatusReport, Store, SyncEvent, SyncJob};
use crate::error::SyncError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

const JOB_COLUMNS: &str = "id, project_id, classifier_model, extractor_model, status, error, \
                           started_at, completed_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<SyncJob> {
    Ok(SyncJob {
        id: row.get(0)?,
        project_id: row.get(1)?,
        classifier_model: row.get(2)?,
        extractor_model: row.get(3)?,
        status: parse_column(row, 4)?,
        error: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<SyncEvent> {
    Ok(SyncEvent {
        id: row.get(0)?,
        event_type: parse_column(row, 1)?,
        message: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn select_job(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<SyncJob>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = ?1"),
        params![job_id],
        row_to_job,
    )
    .optional()
}

fn select_events_after(
    conn: &Connection,
    job_id: &str,
    after_id: i64,
) -> rusqlite::Result<Vec<SyncEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, message, created_at
         FROM sync_events
         WHERE sync_job_id = ?1 AND id > ?2
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![job_id, after_id], row_to_event)?;
    rows.collect()
}

impl Store {
    /// Insert a new `pending` job with a fresh id and `started_at = now`.
    pub async fn create_job(
        &self,
        project_id: i64,
        classifier_model: &str,
        extractor_model: &str,
    ) -> Result<SyncJob, SyncError> {
        let job = SyncJob {
            id: uuid::Uuid::new_v4().to_string(),
            project_id,
            classifier_model: classifier_model.to_string(),
            extractor_model: extractor_model.to_string(),
            status: JobStatus::Pending,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        let row = job.clone();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO sync_jobs
                     (id, project_id, classifier_model, extractor_model, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id,
                    row.project_id,
                    row.classifier_model,
                    row.extractor_model,
                    row.status.as_str(),
                    row.started_at,
                ],
            )
        })
        .await?;
        Ok(job)
    }

    /// Move a job from `pending` to `running`. Returns false if the job was
    /// not pending.
    pub async fn mark_job_running(&self, job_id: &str) -> Result<bool, SyncError> {
        let job_id = job_id.to_string();
        self.write(move |conn| {
            conn.execute(
                "UPDATE sync_jobs SET status = 'running' WHERE id = ?1 AND status = 'pending'",
                params![job_id],
            )
            .map(|n| n == 1)
        })
        .await
    }

    /// Terminal transition. Only a non-terminal job is updated, so a job
    /// finishes at most once; returns whether this call did it.
    pub async fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool, SyncError> {
        if !status.is_terminal() {
            return Err(SyncError::Internal(format!(
                "finish_job called with non-terminal status '{status}'"
            )));
        }
        let job_id = job_id.to_string();
        self.write(move |conn| {
            conn.execute(
                "UPDATE sync_jobs
                 SET status = ?2, error = ?3, completed_at = ?4
                 WHERE id = ?1 AND status IN ('pending', 'running')",
                params![job_id, status.as_str(), error, Utc::now()],
            )
            .map(|n| n == 1)
        })
        .await
    }

    /// Fail a `pending` or `running` job and append an `error` event, in one
    /// transaction. Nothing is written when the job is already terminal.
    pub async fn fail_unfinished_job(
        &self,
        job_id: &str,
        error: &str,
        event_message: &str,
    ) -> Result<bool, SyncError> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        let event_message = event_message.to_string();
        self.write(move |conn| {
            let now = Utc::now();
            let changed = conn.execute(
                "UPDATE sync_jobs
                 SET status = 'failed', error = ?2, completed_at = ?3
                 WHERE id = ?1 AND status IN ('pending', 'running')",
                params![job_id, error, now],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO sync_events (sync_job_id, event_type, message, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, EventType::Error.as_str(), event_message, now],
            )?;
            Ok(true)
        })
        .await
    }

    /// Load a job, or `JobNotFound`.
    pub async fn get_job(&self, job_id: &str) -> Result<SyncJob, SyncError> {
        let id = job_id.to_string();
        self.read(move |conn| select_job(conn, &id))
            .await?
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Append one event. Returns the stored event with its sequence id.
    pub async fn append_event(
        &self,
        job_id: &str,
        event_type: EventType,
        message: &str,
    ) -> Result<SyncEvent, SyncError> {
        let job_id = job_id.to_string();
        let message = message.to_string();
        let created_at = Utc::now();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO sync_events (sync_job_id, event_type, message, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, event_type.as_str(), message, created_at],
            )?;
            Ok(SyncEvent {
                id: conn.last_insert_rowid(),
                event_type,
                message,
                created_at,
            })
        })
        .await
    }

    /// Every event of a job in insertion order.
    pub async fn job_events(&self, job_id: &str) -> Result<Vec<SyncEvent>, SyncError> {
        self.events_after(job_id, 0).await
    }

    /// Events with a sequence id greater than `after_id`.
    pub async fn events_after(
        &self,
        job_id: &str,
        after_id: i64,
    ) -> Result<Vec<SyncEvent>, SyncError> {
        let job_id = job_id.to_string();
        self.read(move |conn| select_events_after(conn, &job_id, after_id))
            .await
    }

    /// Job status and full event stream, read under one lock so the two are
    /// consistent with each other.
    pub async fn job_report(&self, job_id: &str) -> Result<JobReport, SyncError> {
        let id = job_id.to_string();
        let found = self
            .read(move |conn| {
                let Some(job) = select_job(conn, &id)? else {
                    return Ok(None);
                };
                let events = select_events_after(conn, &id, 0)?;
                Ok(Some(JobReport {
                    job: JobStatusReport::from(&job),
                    events,
                }))
            })
            .await?;
        found.ok_or_else(|| SyncError::JobNotFound {
            job_id: job_id.to_string(),
        })
    }

    /// Jobs still `pending` or `running`, oldest first.
    pub async fn unfinished_jobs(&self) -> Result<Vec<SyncJob>, SyncError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM sync_jobs
                 WHERE status IN ('pending', 'running')
                 ORDER BY started_at"
            ))?;
            let rows = stmt.query_map([], row_to_job)?;
            rows.collect()
        })
        .await
    }
}
