//! Per-target bookkeeping for `DeploymentFanout`/`PatchFanout` jobs: one
//! `job_results` row per device the fanout worker dispatched a command to,
//! plus the `fanout_completions` marker that makes "first time every target
//! reached a terminal state" a one-shot event rather than something the
//! sweep would otherwise re-fire on every tick.

use breeze_domain_models::job::{JobResult, JobResultStatus};
use chrono::{DateTime, Utc};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_datetime, get_json, get_opt_datetime, get_opt_str, get_opt_uuid, get_uuid, to_json};

#[derive(Clone)]
pub struct FanoutRepository {
    db: DbClient,
}

const JOB_RESULT_COLUMNS: &str = "id, job_id, org_id, device_id, command_id, status, error, created_at, completed_at";

impl FanoutRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    /// Insert-or-ignore one pending row per target, so a fanout job leased a
    /// second time after a worker crash doesn't lose track of devices it
    /// already seeded rows for.
    #[instrument(skip(self, device_ids))]
    pub async fn seed_results(&self, job_id: Uuid, org_id: Uuid, device_ids: &[Uuid], now: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        for device_id in device_ids {
            conn.execute(
                "INSERT INTO job_results (id, job_id, org_id, device_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(job_id, device_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    job_id.to_string(),
                    org_id.to_string(),
                    device_id.to_string(),
                    to_json(&JobResultStatus::Pending),
                    now.to_rfc3339(),
                ],
            )
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn mark_dispatched(&self, job_id: Uuid, device_id: Uuid, command_id: Uuid) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE job_results SET status = ?1, command_id = ?2 WHERE job_id = ?3 AND device_id = ?4",
            params![to_json(&JobResultStatus::Dispatched), command_id.to_string(), job_id.to_string(), device_id.to_string()],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn mark_outcome(&self, job_id: Uuid, device_id: Uuid, status: JobResultStatus, error: Option<&str>, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE job_results SET status = ?1, error = ?2, completed_at = ?3 WHERE job_id = ?4 AND device_id = ?5",
            params![to_json(&status), error.map(|s| s.to_string()), at.to_rfc3339(), job_id.to_string(), device_id.to_string()],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<JobResult>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {JOB_RESULT_COLUMNS} FROM job_results WHERE job_id = ?1"), params![job_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_job_result(&row)?);
        }
        Ok(out)
    }

    /// Every dispatched row still waiting on its command to finish, across
    /// every fanout job — the reconciliation sweep's input set.
    #[instrument(skip(self))]
    pub async fn list_dispatched(&self) -> Result<Vec<JobResult>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {JOB_RESULT_COLUMNS} FROM job_results WHERE status = ?1"), params![to_json(&JobResultStatus::Dispatched)])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_job_result(&row)?);
        }
        Ok(out)
    }

    /// Records that `job_id`'s completion has been reported; returns `true`
    /// only the first time, so the caller publishes the completion event
    /// exactly once no matter how many sweep ticks notice all targets are
    /// terminal.
    #[instrument(skip(self))]
    pub async fn mark_reported(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<bool, DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute(
                "INSERT INTO fanout_completions (job_id, reported_at) VALUES (?1, ?2) ON CONFLICT(job_id) DO NOTHING",
                params![job_id.to_string(), at.to_rfc3339()],
            )
            .await?;
        Ok(affected == 1)
    }
}

fn map_job_result(row: &libsql::Row) -> Result<JobResult, DbError> {
    Ok(JobResult {
        id: get_uuid(row, 0)?,
        job_id: get_uuid(row, 1)?,
        org_id: get_uuid(row, 2)?,
        device_id: get_uuid(row, 3)?,
        command_id: get_opt_uuid(row, 4)?,
        status: get_json::<JobResultStatus>(row, 5)?,
        error: get_opt_str(row, 6)?,
        created_at: get_datetime(row, 7)?,
        completed_at: get_opt_datetime(row, 8)?,
    })
}
