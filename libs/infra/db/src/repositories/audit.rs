//! Append-only audit log. Rows are never updated or deleted; the checksum
//! chain built in `breeze_shared_telemetry::audit` depends on that.

use breeze_domain_models::audit::{ActorType, AuditLogEntry, AuditResult};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_datetime, get_json, get_opt_str, get_opt_uuid, get_str, get_uuid};

#[derive(Clone)]
pub struct AuditRepository {
    db: DbClient,
}

const GENESIS_CHECKSUM: &str = "genesis";

impl AuditRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self, entry))]
    pub async fn append(&self, entry: &AuditLogEntry) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO audit_log (id, org_id, timestamp, actor_type, actor_id, actor_email, action, resource_type, resource_id, resource_name, details, ip, user_agent, result, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                entry.id.to_string(),
                entry.org_id.map(|v| v.to_string()),
                entry.timestamp.to_rfc3339(),
                crate::rowext::to_json(&entry.actor_type),
                entry.actor_id.to_string(),
                entry.actor_email.clone(),
                entry.action.clone(),
                entry.resource_type.clone(),
                entry.resource_id.map(|v| v.to_string()),
                entry.resource_name.clone(),
                entry.details.to_string(),
                entry.ip.clone(),
                entry.user_agent.clone(),
                crate::rowext::to_json(&entry.result),
                entry.checksum.clone(),
            ],
        )
        .await?;
        Ok(())
    }

    /// The checksum of the most recently written row globally, i.e. the
    /// value the next entry must chain from. `"genesis"` if the log is empty.
    #[instrument(skip(self))]
    pub async fn last_checksum(&self) -> Result<String, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn.query("SELECT checksum FROM audit_log ORDER BY timestamp DESC, id DESC LIMIT 1", ()).await?;
        match rows.next().await? {
            Some(row) => get_str(&row, 0),
            None => Ok(GENESIS_CHECKSUM.to_string()),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_for_org(&self, org_id: Uuid, limit: i64) -> Result<Vec<AuditLogEntry>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, org_id, timestamp, actor_type, actor_id, actor_email, action, resource_type, resource_id, resource_name, details, ip, user_agent, result, checksum
                 FROM audit_log WHERE org_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
                params![org_id.to_string(), limit],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_entry(&row)?);
        }
        Ok(out)
    }

    /// Walks the full chain and recomputes each checksum, returning the id
    /// of the first row whose stored checksum doesn't match — evidence the
    /// log was tampered with after that point.
    #[instrument(skip(self))]
    pub async fn verify_chain(&self) -> Result<Option<Uuid>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, org_id, timestamp, actor_type, actor_id, actor_email, action, resource_type, resource_id, resource_name, details, ip, user_agent, result, checksum
                 FROM audit_log ORDER BY timestamp ASC, id ASC",
                (),
            )
            .await?;
        let mut previous = GENESIS_CHECKSUM.to_string();
        while let Some(row) = rows.next().await? {
            let entry = map_entry(&row)?;
            let expected = breeze_shared_telemetry::audit::compute_checksum(
                &previous,
                entry.id,
                entry.timestamp,
                entry.actor_id,
                &entry.action,
                &entry.resource_type,
                entry.resource_id,
                entry.result,
            );
            if expected != entry.checksum {
                return Ok(Some(entry.id));
            }
            previous = entry.checksum;
        }
        Ok(None)
    }
}

fn map_entry(row: &libsql::Row) -> Result<AuditLogEntry, DbError> {
    Ok(AuditLogEntry {
        id: get_uuid(row, 0)?,
        org_id: get_opt_uuid(row, 1)?,
        timestamp: get_datetime(row, 2)?,
        actor_type: get_json::<ActorType>(row, 3)?,
        actor_id: get_uuid(row, 4)?,
        actor_email: get_opt_str(row, 5)?,
        action: get_str(row, 6)?,
        resource_type: get_str(row, 7)?,
        resource_id: get_opt_uuid(row, 8)?,
        resource_name: get_opt_str(row, 9)?,
        details: get_json(row, 10)?,
        ip: get_opt_str(row, 11)?,
        user_agent: get_opt_str(row, 12)?,
        result: get_json::<AuditResult>(row, 13)?,
        checksum: get_str(row, 14)?,
    })
}
