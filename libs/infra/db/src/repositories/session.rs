//! Remote desktop/terminal/file-transfer sessions.

use breeze_domain_models::session::{
    FileTransfer, IceCandidate, RemoteSession, RemoteSessionStatus, RemoteSessionType,
    TransferDirection, TransferStatus,
};
use chrono::{DateTime, Utc};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_datetime, get_i64, get_json, get_opt_datetime, get_opt_str, get_opt_uuid, get_str, get_uuid, to_json};

#[derive(Clone)]
pub struct SessionRepository {
    db: DbClient,
}

const SESSION_COLUMNS: &str = "id, device_id, user_id, org_id, type, status, offer, answer, ice_candidates, started_at, ended_at, last_activity_at, bytes_transferred";
const FILE_TRANSFER_COLUMNS: &str = "id, session_id, device_id, user_id, direction, remote_path, size, status, progress_percent";

impl SessionRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self, session))]
    pub async fn create(&self, session: &RemoteSession) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO remote_sessions (id, device_id, user_id, org_id, type, status, started_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id.to_string(),
                session.device_id.to_string(),
                session.user_id.to_string(),
                session.org_id.to_string(),
                to_json(&session.kind),
                to_json(&session.status),
                session.started_at.to_rfc3339(),
                session.last_activity_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<RemoteSession, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {SESSION_COLUMNS} FROM remote_sessions WHERE id = ?1"), params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_session(&row)
    }

    #[instrument(skip(self))]
    pub async fn apply_signal(&self, id: Uuid, offer: Option<&str>, answer: Option<&str>, new_ice: Option<&IceCandidate>, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        if let Some(sdp) = offer {
            conn.execute("UPDATE remote_sessions SET offer = ?1, status = 'connecting', last_activity_at = ?2 WHERE id = ?3", params![sdp.to_string(), at.to_rfc3339(), id.to_string()]).await?;
        }
        if let Some(sdp) = answer {
            conn.execute("UPDATE remote_sessions SET answer = ?1, status = 'active', last_activity_at = ?2 WHERE id = ?3", params![sdp.to_string(), at.to_rfc3339(), id.to_string()]).await?;
        }
        if let Some(candidate) = new_ice {
            let existing = self.get(id).await?;
            let mut candidates = existing.ice_candidates;
            candidates.push(candidate.clone());
            conn.execute(
                "UPDATE remote_sessions SET ice_candidates = ?1, last_activity_at = ?2 WHERE id = ?3",
                params![to_json(&candidates), at.to_rfc3339(), id.to_string()],
            )
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn record_progress(&self, id: Uuid, bytes_transferred: u64, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE remote_sessions SET bytes_transferred = ?1, last_activity_at = ?2 WHERE id = ?3",
            params![bytes_transferred as i64, at.to_rfc3339(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn end(&self, id: Uuid, status: RemoteSessionStatus, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE remote_sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
            params![to_json(&status), at.to_rfc3339(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    /// Every session still in a non-terminal state, for the reaper sweep to
    /// filter through `breeze_domain_session::staleness::stale_sessions`
    /// rather than baking the idle cutoff into SQL.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<RemoteSession>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {SESSION_COLUMNS} FROM remote_sessions WHERE status IN ('pending','connecting','active')"), params![])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_session(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self, transfer))]
    pub async fn create_file_transfer(&self, transfer: &FileTransfer) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO file_transfers (id, session_id, device_id, user_id, direction, remote_path, size, status, progress_percent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                transfer.id.to_string(),
                transfer.session_id.map(|v| v.to_string()),
                transfer.device_id.to_string(),
                transfer.user_id.to_string(),
                to_json(&transfer.direction),
                transfer.remote_path.clone(),
                transfer.size as i64,
                to_json(&transfer.status),
                transfer.progress_percent as i64,
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_transfer_progress(&self, id: Uuid, progress_percent: u8, status: TransferStatus) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE file_transfers SET progress_percent = ?1, status = ?2 WHERE id = ?3",
            params![progress_percent as i64, to_json(&status), id.to_string()],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_file_transfer(&self, id: Uuid) -> Result<FileTransfer, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {FILE_TRANSFER_COLUMNS} FROM file_transfers WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_file_transfer(&row)
    }
}

fn map_file_transfer(row: &libsql::Row) -> Result<FileTransfer, DbError> {
    Ok(FileTransfer {
        id: get_uuid(row, 0)?,
        session_id: get_opt_uuid(row, 1)?,
        device_id: get_uuid(row, 2)?,
        user_id: get_uuid(row, 3)?,
        direction: get_json::<TransferDirection>(row, 4)?,
        remote_path: get_str(row, 5)?,
        size: get_i64(row, 6)? as u64,
        status: get_json::<TransferStatus>(row, 7)?,
        progress_percent: get_i64(row, 8)? as u8,
    })
}

fn map_session(row: &libsql::Row) -> Result<RemoteSession, DbError> {
    Ok(RemoteSession {
        id: get_uuid(row, 0)?,
        device_id: get_uuid(row, 1)?,
        user_id: get_uuid(row, 2)?,
        org_id: get_uuid(row, 3)?,
        kind: get_json::<RemoteSessionType>(row, 4)?,
        status: get_json::<RemoteSessionStatus>(row, 5)?,
        offer: get_opt_str(row, 6)?,
        answer: get_opt_str(row, 7)?,
        ice_candidates: get_json(row, 8)?,
        started_at: get_datetime(row, 9)?,
        ended_at: get_opt_datetime(row, 10)?,
        last_activity_at: get_datetime(row, 11)?,
        bytes_transferred: get_i64(row, 12)? as u64,
    })
}
