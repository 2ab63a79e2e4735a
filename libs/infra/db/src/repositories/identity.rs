//! Users, login sessions, and API keys.

use breeze_domain_models::identity::{ApiKey, ApiKeyStatus, Session, User, UserStatus};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_bool, get_datetime, get_i64, get_opt_datetime, get_opt_i64, get_opt_str, get_opt_uuid, get_str, get_uuid, get_json, to_json};

#[derive(Clone)]
pub struct IdentityRepository {
    db: DbClient,
}

impl IdentityRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self, user))]
    pub async fn create_user(&self, user: &User) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO users (id, email, name, password_hash, mfa_secret_encrypted, mfa_enabled, status, last_login_at, password_changed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id.to_string(),
                user.email.clone(),
                user.name.clone(),
                user.password_hash.clone(),
                user.mfa_secret_encrypted.clone(),
                user.mfa_enabled as i64,
                to_json(&user.status),
                user.last_login_at.map(|d| d.to_rfc3339()),
                user.password_changed_at.map(|d| d.to_rfc3339()),
                user.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_id(&self, id: Uuid) -> Result<User, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, email, name, password_hash, mfa_secret_encrypted, mfa_enabled, status, last_login_at, password_changed_at, created_at
                 FROM users WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_user(&row)
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_email(&self, email: &str) -> Result<User, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, email, name, password_hash, mfa_secret_encrypted, mfa_enabled, status, last_login_at, password_changed_at, created_at
                 FROM users WHERE email = ?1 AND deleted_at IS NULL",
                params![email.to_lowercase()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_user(&row)
    }

    #[instrument(skip(self))]
    pub async fn record_login(&self, user_id: Uuid, at: chrono::DateTime<chrono::Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute("UPDATE users SET last_login_at = ?1 WHERE id = ?2", params![at.to_rfc3339(), user_id.to_string()])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_session(&self, session: &Session) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, ip, user_agent, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id.to_string(),
                session.user_id.to_string(),
                session.token_hash.clone(),
                session.expires_at.to_rfc3339(),
                session.ip.clone(),
                session.user_agent.clone(),
                session.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_session_by_token_hash(&self, token_hash: &str) -> Result<Session, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, user_id, token_hash, expires_at, ip, user_agent, created_at FROM sessions WHERE token_hash = ?1",
                params![token_hash.to_string()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        Ok(Session {
            id: get_uuid(&row, 0)?,
            user_id: get_uuid(&row, 1)?,
            token_hash: get_str(&row, 2)?,
            expires_at: get_datetime(&row, 3)?,
            ip: get_opt_str(&row, 4)?,
            user_agent: get_opt_str(&row, 5)?,
            created_at: get_datetime(&row, 6)?,
        })
    }

    /// Used at logout; the revocation itself is also mirrored into
    /// `breeze-infra-cache` so a still-valid JWT is rejected immediately
    /// rather than only once its row disappears from read replicas.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, id: Uuid) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()]).await?;
        Ok(())
    }

    #[instrument(skip(self, key))]
    pub async fn create_api_key(&self, key: &ApiKey) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO api_keys (id, org_id, partner_id, user_id, name, key_prefix, key_hash, scopes, rate_limit, expires_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                key.id.to_string(),
                key.org_id.map(|v| v.to_string()),
                key.partner_id.map(|v| v.to_string()),
                key.user_id.to_string(),
                key.name.clone(),
                key.key_prefix.clone(),
                key.key_hash.clone(),
                to_json(&key.scopes),
                key.rate_limit,
                key.expires_at.map(|d| d.to_rfc3339()),
                to_json(&key.status),
                key.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_api_key_by_prefix(&self, prefix: &str) -> Result<ApiKey, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, org_id, partner_id, user_id, name, key_prefix, key_hash, scopes, rate_limit, expires_at, last_used_at, usage_count, status, created_at
                 FROM api_keys WHERE key_prefix = ?1",
                params![prefix.to_string()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        Ok(ApiKey {
            id: get_uuid(&row, 0)?,
            org_id: get_opt_uuid(&row, 1)?,
            partner_id: get_opt_uuid(&row, 2)?,
            user_id: get_uuid(&row, 3)?,
            name: get_str(&row, 4)?,
            key_prefix: get_str(&row, 5)?,
            key_hash: get_str(&row, 6)?,
            scopes: get_json(&row, 7)?,
            rate_limit: get_opt_i64(&row, 8)?.map(|v| v as u32),
            expires_at: get_opt_datetime(&row, 9)?,
            last_used_at: get_opt_datetime(&row, 10)?,
            usage_count: get_i64(&row, 11)? as u64,
            status: get_json::<ApiKeyStatus>(&row, 12)?,
            created_at: get_datetime(&row, 13)?,
        })
    }

    #[instrument(skip(self))]
    pub async fn record_api_key_use(&self, id: Uuid, at: chrono::DateTime<chrono::Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE api_keys SET last_used_at = ?1, usage_count = usage_count + 1 WHERE id = ?2",
            params![at.to_rfc3339(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    /// Writes the (still AES-GCM encrypted) TOTP secret generated by setup,
    /// and flips `mfaEnabled` once the caller has proven possession of it
    /// via a verified code.
    #[instrument(skip(self, secret_encrypted))]
    pub async fn set_mfa_secret(&self, user_id: Uuid, secret_encrypted: Option<&str>, enabled: bool) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute(
                "UPDATE users SET mfa_secret_encrypted = ?1, mfa_enabled = ?2 WHERE id = ?3",
                params![secret_encrypted.map(str::to_string), enabled as i64, user_id.to_string()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_organization_member(&self, org_id: Uuid, user_id: Uuid, role_id: Uuid) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO organization_users (org_id, user_id, role_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(org_id, user_id) DO UPDATE SET role_id = excluded.role_id",
            params![org_id.to_string(), user_id.to_string(), role_id.to_string()],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_partner_member(&self, partner_id: Uuid, user_id: Uuid, role_id: Uuid, org_access: &str, org_ids: &str) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO partner_users (partner_id, user_id, role_id, org_access, org_ids) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(partner_id, user_id) DO UPDATE SET role_id = excluded.role_id, org_access = excluded.org_access, org_ids = excluded.org_ids",
            params![partner_id.to_string(), user_id.to_string(), role_id.to_string(), org_access.to_string(), org_ids.to_string()],
        )
        .await?;
        Ok(())
    }
}

fn map_user(row: &libsql::Row) -> Result<User, DbError> {
    Ok(User {
        id: get_uuid(row, 0)?,
        email: get_str(row, 1)?,
        name: get_str(row, 2)?,
        password_hash: get_opt_str(row, 3)?,
        mfa_secret_encrypted: get_opt_str(row, 4)?,
        mfa_enabled: get_bool(row, 5)?,
        status: get_json::<UserStatus>(row, 6)?,
        last_login_at: get_opt_datetime(row, 7)?,
        password_changed_at: get_opt_datetime(row, 8)?,
        created_at: get_datetime(row, 9)?,
        deleted_at: None,
    })
}
