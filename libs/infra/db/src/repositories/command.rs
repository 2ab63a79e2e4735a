//! Device commands. `post_result` is the security-sensitive write here: it
//! only succeeds if the caller's agent id matches the command's device, and
//! returns `NotFound` rather than any distinguishing error otherwise so a
//! forged or guessed command id can't be used to probe for device ids.

use breeze_domain_models::command::{CommandStatus, CommandType, DeviceCommand};
use chrono::{DateTime, Utc};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_datetime, get_json, get_opt_datetime, get_opt_i64, get_opt_str, get_uuid, to_json};

#[derive(Clone)]
pub struct CommandRepository {
    db: DbClient,
}

const COMMAND_COLUMNS: &str = "id, device_id, org_id, type, payload, status, exit_code, stdout, stderr, issued_by, issued_at, started_at, completed_at, expires_at";

impl CommandRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self, command))]
    pub async fn enqueue(&self, command: &DeviceCommand) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO device_commands (id, device_id, org_id, type, payload, status, issued_by, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                command.id.to_string(),
                command.device_id.to_string(),
                command.org_id.to_string(),
                to_json(&command.kind),
                command.payload.to_string(),
                to_json(&command.status),
                command.issued_by.to_string(),
                command.issued_at.to_rfc3339(),
                command.expires_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<DeviceCommand, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {COMMAND_COLUMNS} FROM device_commands WHERE id = ?1"), params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_command(&row)
    }

    /// Commands still owed to a device, delivered as part of the heartbeat
    /// response; transitions each to `Sent` in the same call.
    #[instrument(skip(self))]
    pub async fn drain_pending_for_device(&self, device_id: Uuid, now: DateTime<Utc>) -> Result<Vec<DeviceCommand>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {COMMAND_COLUMNS} FROM device_commands WHERE device_id = ?1 AND status = 'pending'"),
                params![device_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_command(&row)?);
        }
        for cmd in &out {
            conn.execute(
                "UPDATE device_commands SET status = 'sent', started_at = ?1 WHERE id = ?2 AND status = 'pending'",
                params![now.to_rfc3339(), cmd.id.to_string()],
            )
            .await?;
        }
        Ok(out)
    }

    /// Accepts a result only if `device.agent_id` matches the caller's
    /// agent id for the command's device; the join enforces that ownership
    /// check inside the database rather than trusting a pre-fetched row.
    ///
    /// `attempt` is the agent's own retry counter for this command: a result
    /// whose `attempt` is not newer than the one already recorded is treated
    /// as a duplicate delivery of a result already applied and is accepted
    /// as a no-op, rather than letting a retransmitted older attempt
    /// clobber a result a newer attempt already posted.
    #[instrument(skip(self))]
    pub async fn post_result(
        &self,
        command_id: Uuid,
        caller_agent_id: &str,
        status: CommandStatus,
        exit_code: i32,
        stdout: Option<&str>,
        stderr: Option<&str>,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT result_attempt FROM device_commands WHERE id = ?1 AND device_id = (SELECT id FROM devices WHERE agent_id = ?2)",
                params![command_id.to_string(), caller_agent_id.to_string()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Err(DbError::NotFound);
        };
        if let Some(recorded) = get_opt_i64(&row, 0)? {
            if recorded as u32 >= attempt {
                return Ok(());
            }
        }

        conn.execute(
            "UPDATE device_commands SET status = ?1, exit_code = ?2, stdout = ?3, stderr = ?4, completed_at = ?5, result_attempt = ?6
             WHERE id = ?7
               AND device_id = (SELECT id FROM devices WHERE agent_id = ?8)",
            params![
                to_json(&status),
                exit_code,
                stdout.map(str::to_string),
                stderr.map(str::to_string),
                now.to_rfc3339(),
                attempt,
                command_id.to_string(),
                caller_agent_id.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Pending/sent commands whose `expires_at` has passed, swept to
    /// `Timeout` by the background reaper.
    #[instrument(skip(self))]
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<DeviceCommand>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {COMMAND_COLUMNS} FROM device_commands WHERE status IN ('pending','sent','running') AND expires_at < ?1"),
                params![now.to_rfc3339()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_command(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn mark_timed_out(&self, id: Uuid) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute("UPDATE device_commands SET status = 'timeout' WHERE id = ?1", params![id.to_string()]).await?;
        Ok(())
    }

    /// Whether a device already has an in-flight instance of a serialized
    /// command kind, used to reject a second `device.reboot` before the
    /// first completes.
    #[instrument(skip(self))]
    pub async fn has_in_flight_of_kind(&self, device_id: Uuid, kind: CommandType) -> Result<bool, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM device_commands WHERE device_id = ?1 AND type = ?2 AND status IN ('pending','sent','running') LIMIT 1",
                params![device_id.to_string(), to_json(&kind)],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }
}

fn map_command(row: &libsql::Row) -> Result<DeviceCommand, DbError> {
    Ok(DeviceCommand {
        id: get_uuid(row, 0)?,
        device_id: get_uuid(row, 1)?,
        org_id: get_uuid(row, 2)?,
        kind: get_json::<CommandType>(row, 3)?,
        payload: get_json(row, 4)?,
        status: get_json::<CommandStatus>(row, 5)?,
        exit_code: row.get::<Option<i64>>(6).map_err(|e| DbError::Mapping(e.to_string()))?.map(|v| v as i32),
        stdout: get_opt_str(row, 7)?,
        stderr: get_opt_str(row, 8)?,
        issued_by: get_uuid(row, 9)?,
        issued_at: get_datetime(row, 10)?,
        started_at: get_opt_datetime(row, 11)?,
        completed_at: get_opt_datetime(row, 12)?,
        expires_at: get_datetime(row, 13)?,
    })
}
