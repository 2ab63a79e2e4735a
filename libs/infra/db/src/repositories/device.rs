//! Device enrollment, heartbeat bookkeeping, and the certificate fields used
//! by the renewal sweep.

use breeze_domain_models::device::{Device, DeviceCertificate, DeviceStatus, EnrollmentKey, OsType, SoftwareInventoryEntry};
use chrono::{DateTime, Utc};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_datetime, get_i64, get_json, get_opt_datetime, get_opt_i64, get_opt_str, get_str, get_uuid, to_json};

#[derive(Clone)]
pub struct DeviceRepository {
    db: DbClient,
}

const DEVICE_COLUMNS: &str = "id, org_id, site_id, agent_id, hostname, display_name, os_type, os_version, architecture, agent_version, status, agent_token_hash, last_seen_at, enrolled_at, tags, cert_serial, cert_external_id, cert_issued_at, cert_expires_at";

impl DeviceRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self, device))]
    pub async fn enroll(&self, device: &Device) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO devices (id, org_id, site_id, agent_id, hostname, display_name, os_type, os_version, architecture, agent_version, status, agent_token_hash, last_seen_at, enrolled_at, tags, cert_serial, cert_external_id, cert_issued_at, cert_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                device.id.to_string(),
                device.org_id.to_string(),
                device.site_id.to_string(),
                device.agent_id.clone(),
                device.hostname.clone(),
                device.display_name.clone(),
                to_json(&device.os_type),
                device.os_version.clone(),
                device.architecture.clone(),
                device.agent_version.clone(),
                to_json(&device.status),
                device.agent_token_hash.clone(),
                device.last_seen_at.map(|d| d.to_rfc3339()),
                device.enrolled_at.to_rfc3339(),
                to_json(&device.tags),
                device.certificate.as_ref().map(|c| c.serial.clone()),
                device.certificate.as_ref().map(|c| c.external_cert_id.clone()),
                device.certificate.as_ref().map(|c| c.issued_at.to_rfc3339()),
                device.certificate.as_ref().map(|c| c.expires_at.to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: Uuid) -> Result<Device, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1 AND deleted_at IS NULL"), params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_device(&row)
    }

    #[instrument(skip(self))]
    pub async fn get_by_agent_id(&self, agent_id: &str) -> Result<Device, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE agent_id = ?1 AND deleted_at IS NULL"), params![agent_id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_device(&row)
    }

    #[instrument(skip(self))]
    pub async fn list_for_org(&self, org_id: Uuid) -> Result<Vec<Device>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE org_id = ?1 AND deleted_at IS NULL"), params![org_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_device(&row)?);
        }
        Ok(out)
    }

    /// Every non-deleted device, for system-scope actors whose
    /// `accessibleOrgIds` is `AlwaysTrue`.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Device>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn.query(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE deleted_at IS NULL"), params![]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_device(&row)?);
        }
        Ok(out)
    }

    /// Used for partner-scope actors whose `accessibleOrgIds` resolves to a
    /// specific set of orgs rather than "all" or "none". Fans out to
    /// `list_for_org` per id rather than a dynamic `IN (...)` clause; the
    /// accessible set is bounded by a partner's own org count, never large
    /// enough for this to matter.
    #[instrument(skip(self, org_ids))]
    pub async fn list_for_orgs(&self, org_ids: &[Uuid]) -> Result<Vec<Device>, DbError> {
        let mut out = Vec::new();
        for org_id in org_ids {
            out.extend(self.list_for_org(*org_id).await?);
        }
        Ok(out)
    }

    #[instrument(skip(self, display_name, tags))]
    pub async fn update_details(&self, device_id: Uuid, display_name: Option<&str>, tags: Option<&[String]>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        if let Some(display_name) = display_name {
            conn.execute("UPDATE devices SET display_name = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![display_name.to_string(), device_id.to_string()])
                .await?;
        }
        if let Some(tags) = tags {
            conn.execute("UPDATE devices SET tags = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![to_json(&tags), device_id.to_string()])
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn soft_delete(&self, device_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute("UPDATE devices SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![at.to_rfc3339(), device_id.to_string()])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Every online device whose `last_seen_at` predates `cutoff`, used by
    /// the offline sweep to transition them to `Offline`.
    #[instrument(skip(self))]
    pub async fn list_stale_online(&self, cutoff: DateTime<Utc>) -> Result<Vec<Device>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE status = 'online' AND (last_seen_at IS NULL OR last_seen_at < ?1) AND deleted_at IS NULL"),
                params![cutoff.to_rfc3339()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_device(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn record_heartbeat(&self, device_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute(
                "UPDATE devices SET last_seen_at = ?1, status = 'online' WHERE id = ?2 AND deleted_at IS NULL",
                params![at.to_rfc3339(), device_id.to_string()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_status(&self, device_id: Uuid, status: &DeviceStatus) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute("UPDATE devices SET status = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![to_json(status), device_id.to_string()])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, cert))]
    pub async fn update_certificate(&self, device_id: Uuid, cert: &DeviceCertificate) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute(
                "UPDATE devices SET cert_serial = ?1, cert_external_id = ?2, cert_issued_at = ?3, cert_expires_at = ?4 WHERE id = ?5 AND deleted_at IS NULL",
                params![
                    cert.serial.clone(),
                    cert.external_cert_id.clone(),
                    cert.issued_at.to_rfc3339(),
                    cert.expires_at.to_rfc3339(),
                    device_id.to_string(),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Devices whose certificate is within a third of its lifetime of
    /// expiring, for the renewal sweep; the two-thirds threshold itself
    /// lives in `Device::needs_renewal` and is re-checked in memory because
    /// the window depends on `issued_at`, not just `expires_at`.
    #[instrument(skip(self))]
    pub async fn list_with_expiring_certs(&self, before: DateTime<Utc>) -> Result<Vec<Device>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE cert_expires_at IS NOT NULL AND cert_expires_at < ?1 AND deleted_at IS NULL"),
                params![before.to_rfc3339()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_device(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn get_enrollment_key_by_hash(&self, key_hash: &str) -> Result<EnrollmentKey, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, org_id, site_id, key_hash, max_uses, use_count, expires_at, revoked_at, created_at
                 FROM enrollment_keys WHERE key_hash = ?1",
                params![key_hash.to_string()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        Ok(EnrollmentKey {
            id: get_uuid(&row, 0)?,
            org_id: get_uuid(&row, 1)?,
            site_id: get_uuid(&row, 2)?,
            key_hash: get_str(&row, 3)?,
            max_uses: get_opt_i64(&row, 4)?.map(|v| v as u32),
            use_count: get_i64(&row, 5)? as u32,
            expires_at: get_opt_datetime(&row, 6)?,
            revoked_at: get_opt_datetime(&row, 7)?,
            created_at: get_datetime(&row, 8)?,
        })
    }

    /// Increments the key's use counter conditioned on it still being under
    /// `max_uses` (or having none), so two concurrent enrollments against a
    /// single-use key can't both succeed.
    #[instrument(skip(self))]
    pub async fn consume_enrollment_key(&self, id: Uuid) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute(
                "UPDATE enrollment_keys SET use_count = use_count + 1
                 WHERE id = ?1 AND (max_uses IS NULL OR use_count < max_uses)",
                params![id.to_string()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::Conflict("enrollment key already exhausted".into()));
        }
        Ok(())
    }

    #[instrument(skip(self, key))]
    pub async fn create_enrollment_key(&self, key: &EnrollmentKey) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO enrollment_keys (id, org_id, site_id, key_hash, max_uses, use_count, expires_at, revoked_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                key.id.to_string(),
                key.org_id.to_string(),
                key.site_id.to_string(),
                key.key_hash.clone(),
                key.max_uses,
                key.use_count,
                key.expires_at.map(|d| d.to_rfc3339()),
                key.revoked_at.map(|d| d.to_rfc3339()),
                key.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Current installed-package snapshot for a device, for diffing against
    /// an incoming heartbeat's inventory.
    #[instrument(skip(self))]
    pub async fn list_software(&self, device_id: Uuid) -> Result<Vec<SoftwareInventoryEntry>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT device_id, name, version, installed_at FROM device_software WHERE device_id = ?1", params![device_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(SoftwareInventoryEntry {
                device_id: get_uuid(&row, 0)?,
                name: get_str(&row, 1)?,
                version: get_str(&row, 2)?,
                installed_at: get_opt_datetime(&row, 3)?,
            });
        }
        Ok(out)
    }

    /// Replaces the device's entire stored inventory with `entries` in one
    /// transaction, since a heartbeat always reports a full snapshot rather
    /// than an incremental diff.
    #[instrument(skip(self, entries))]
    pub async fn replace_software(&self, device_id: Uuid, entries: &[SoftwareInventoryEntry], at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute("DELETE FROM device_software WHERE device_id = ?1", params![device_id.to_string()]).await?;
        for entry in entries {
            conn.execute(
                "INSERT INTO device_software (id, device_id, name, version, installed_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![Uuid::new_v4().to_string(), device_id.to_string(), entry.name.clone(), entry.version.clone(), entry.installed_at.unwrap_or(at).to_rfc3339()],
            )
            .await?;
        }
        Ok(())
    }
}

fn map_device(row: &libsql::Row) -> Result<Device, DbError> {
    let cert_serial = get_opt_str(row, 15)?;
    let certificate = match cert_serial {
        Some(serial) => Some(DeviceCertificate {
            serial,
            external_cert_id: get_opt_str(row, 16)?.unwrap_or_default(),
            issued_at: get_opt_datetime(row, 17)?.unwrap_or_else(Utc::now),
            expires_at: get_opt_datetime(row, 18)?.unwrap_or_else(Utc::now),
        }),
        None => None,
    };

    Ok(Device {
        id: get_uuid(row, 0)?,
        org_id: get_uuid(row, 1)?,
        site_id: get_uuid(row, 2)?,
        agent_id: get_str(row, 3)?,
        hostname: get_str(row, 4)?,
        display_name: get_str(row, 5)?,
        os_type: get_json::<OsType>(row, 6)?,
        os_version: get_str(row, 7)?,
        architecture: get_str(row, 8)?,
        agent_version: get_str(row, 9)?,
        status: get_json::<DeviceStatus>(row, 10)?,
        agent_token_hash: get_str(row, 11)?,
        last_seen_at: get_opt_datetime(row, 12)?,
        enrolled_at: get_datetime(row, 13)?,
        tags: get_json(row, 14)?,
        certificate,
        deleted_at: None,
    })
}
