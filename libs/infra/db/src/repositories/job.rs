//! The durable job queue. Dequeue is a conditional `UPDATE ... WHERE
//! status = 'pending'` so two workers racing on the same row never both
//! win the lease — whichever `UPDATE` actually mutates a row owns the job.

use breeze_domain_models::job::{JobKind, JobRun, JobStatus};
use chrono::{DateTime, Utc};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_datetime, get_i64, get_json, get_opt_datetime, get_opt_str, get_uuid, to_json};

#[derive(Clone)]
pub struct JobRepository {
    db: DbClient,
}

const JOB_COLUMNS: &str = "id, kind, event_id, payload, status, attempts, leased_until, next_retry_at, last_error, scheduled_for, created_at, completed_at";

impl JobRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    /// Insert-or-ignore on `(kind, event_id)` so re-enqueueing the same
    /// logical event (a retried webhook delivery trigger, a replayed
    /// fanout) is a no-op rather than a duplicate job.
    #[instrument(skip(self, job))]
    pub async fn enqueue(&self, job: &JobRun) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO jobs (id, kind, event_id, payload, status, attempts, scheduled_for, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6)
             ON CONFLICT(kind, event_id) DO NOTHING",
            params![
                job.id.to_string(),
                to_json(&job.kind),
                job.event_id.clone(),
                job.payload.to_string(),
                job.scheduled_for.to_rfc3339(),
                job.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Leases up to `limit` due jobs of `kind` for `lease_duration`,
    /// returning only the rows this call actually claimed.
    #[instrument(skip(self))]
    pub async fn lease_batch(&self, kind: JobKind, limit: i64, now: DateTime<Utc>, lease_duration: chrono::Duration) -> Result<Vec<JobRun>, DbError> {
        let conn = self.db.conn()?;
        let leased_until = (now + lease_duration).to_rfc3339();
        let mut candidates = conn
            .query(
                "SELECT id FROM jobs
                 WHERE kind = ?1 AND status = 'pending' AND scheduled_for <= ?2
                 ORDER BY scheduled_for ASC LIMIT ?3",
                params![to_json(&kind), now.to_rfc3339(), limit],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = candidates.next().await? {
            ids.push(get_uuid(&row, 0)?);
        }

        let mut leased = Vec::new();
        for id in ids {
            let affected = conn
                .execute(
                    "UPDATE jobs SET status = 'leased', leased_until = ?1 WHERE id = ?2 AND status = 'pending'",
                    params![leased_until.clone(), id.to_string()],
                )
                .await?;
            if affected == 1 {
                leased.push(self.get(id).await?);
            }
        }
        Ok(leased)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<JobRun, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"), params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_job(&row)
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE jobs SET status = 'completed', completed_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    /// On a retryable failure this reschedules with exponential backoff; on
    /// the attempt that exhausts `max_retries`, or on a poison-pill error,
    /// the caller should pass `dead_letter = true` instead.
    #[instrument(skip(self))]
    pub async fn fail(&self, id: Uuid, error: &str, next_retry_at: Option<DateTime<Utc>>, dead_letter: bool) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let status = if dead_letter { "dead_letter" } else { "pending" };
        conn.execute(
            "UPDATE jobs SET status = ?1, attempts = attempts + 1, last_error = ?2, next_retry_at = ?3, scheduled_for = COALESCE(?3, scheduled_for), leased_until = NULL WHERE id = ?4",
            params![status, error.to_string(), next_retry_at.map(|d| d.to_rfc3339()), id.to_string()],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_dead_letters(&self, kind: JobKind) -> Result<Vec<JobRun>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE kind = ?1 AND status = 'dead_letter'"), params![to_json(&kind)])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_job(&row)?);
        }
        Ok(out)
    }
}

fn map_job(row: &libsql::Row) -> Result<JobRun, DbError> {
    Ok(JobRun {
        id: get_uuid(row, 0)?,
        kind: get_json::<JobKind>(row, 1)?,
        event_id: row.get::<String>(2).map_err(|e| DbError::Mapping(e.to_string()))?,
        payload: get_json(row, 3)?,
        status: get_json::<JobStatus>(row, 4)?,
        attempts: get_i64(row, 5)? as u32,
        leased_until: get_opt_datetime(row, 6)?,
        next_retry_at: get_opt_datetime(row, 7)?,
        last_error: get_opt_str(row, 8)?,
        scheduled_for: get_datetime(row, 9)?,
        created_at: get_datetime(row, 10)?,
        completed_at: get_opt_datetime(row, 11)?,
    })
}
