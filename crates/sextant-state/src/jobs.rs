use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sextant_core::error::StateError;
use sextant_core::types::JobStatus;

/// Persisted background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl JobRecord {
    pub fn queued(
        job_id: String,
        job_type: &str,
        scope: Option<String>,
        created_at: String,
    ) -> Self {
        Self {
            job_id,
            job_type: job_type.to_string(),
            scope,
            status: JobStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }
}

const JOB_COLUMNS: &str = "job_id, job_type, scope, status, progress, result_json, error_message, created_at, started_at, completed_at";

pub fn create_job(conn: &Connection, job: &JobRecord) -> Result<(), StateError> {
    let result_json = job
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StateError::serialization)?;
    conn.execute(
        "INSERT INTO jobs (job_id, job_type, scope, status, progress, result_json, error_message, created_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            job.job_id,
            job.job_type,
            job.scope,
            job.status.as_str(),
            job.progress,
            result_json,
            job.error,
            job.created_at,
            job.started_at,
            job.completed_at,
        ],
    )
    .map_err(StateError::sqlite)?;
    Ok(())
}

/// Move a job to `status`. Sets `started_at` on entering running and
/// `completed_at` on any terminal status; terminal completion forces progress to 100.
pub fn update_job_status(
    conn: &Connection,
    job_id: &str,
    status: JobStatus,
    result: Option<&Value>,
    error: Option<&str>,
    at: &str,
) -> Result<(), StateError> {
    let result_json = result
        .map(serde_json::to_string)
        .transpose()
        .map_err(StateError::serialization)?;
    let started_at = (status == JobStatus::Running).then_some(at);
    let completed_at = status.is_terminal().then_some(at);
    let progress = (status == JobStatus::Completed).then_some(100u8);

    let changed = conn
        .execute(
            "UPDATE jobs SET
                status = ?1,
                result_json = COALESCE(?2, result_json),
                error_message = COALESCE(?3, error_message),
                started_at = COALESCE(started_at, ?4),
                completed_at = COALESCE(?5, completed_at),
                progress = COALESCE(?6, progress)
             WHERE job_id = ?7",
            params![
                status.as_str(),
                result_json,
                error,
                started_at,
                completed_at,
                progress,
                job_id
            ],
        )
        .map_err(StateError::sqlite)?;
    if changed == 0 {
        return Err(StateError::JobNotFound {
            job_id: job_id.to_string(),
        });
    }
    Ok(())
}

pub fn update_progress(conn: &Connection, job_id: &str, progress: u8) -> Result<(), StateError> {
    conn.execute(
        "UPDATE jobs SET progress = ?1 WHERE job_id = ?2",
        params![progress.min(100), job_id],
    )
    .map_err(StateError::sqlite)?;
    Ok(())
}

pub fn get_job(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>, StateError> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
        params![job_id],
        row_to_job,
    )
    .optional()
    .map_err(StateError::sqlite)
}

/// Most recent jobs first.
pub fn list_jobs(conn: &Connection, limit: usize) -> Result<Vec<JobRecord>, StateError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))
        .map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map(params![limit as i64], row_to_job)
        .map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

/// Fail jobs left queued or running by a previous process. Returns the count.
pub fn mark_interrupted_jobs(conn: &Connection, at: &str) -> Result<usize, StateError> {
    conn.execute(
        "UPDATE jobs SET status = 'failed', error_message = 'interrupted', completed_at = ?1
         WHERE status IN ('queued', 'running')",
        params![at],
    )
    .map_err(StateError::sqlite)
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status_raw: String = row.get(3)?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(3, "status".into(), Type::Text))?;
    let result_json: Option<String> = row.get(5)?;
    let result = match result_json {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(JobRecord {
        job_id: row.get(0)?,
        job_type: row.get(1)?,
        scope: row.get(2)?,
        status,
        progress: row.get(4)?,
        result,
        error: row.get(6)?,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}
