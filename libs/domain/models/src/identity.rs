//! Users, sessions and API keys — the credential side of tenancy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Invited,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// AES-256-GCM ciphertext, `enc:v1:` prefixed. Never logged, never sent
    /// to a client.
    #[serde(skip_serializing)]
    pub mfa_secret_encrypted: Option<String>,
    pub mfa_enabled: bool,
    pub status: UserStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Case-insensitive email comparison, matching the unique-index
    /// semantics the persistence layer enforces.
    pub fn email_matches(&self, other: &str) -> bool {
        self.email.eq_ignore_ascii_case(other)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: Uuid,
    pub org_id: Option<Uuid>,
    pub partner_id: Option<Uuid>,
    pub user_id: Uuid,
    pub name: String,
    /// First 8 chars of the issued secret, stored in plaintext so lookup can
    /// use an indexed column instead of a full-table hash comparison.
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub rate_limit: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub status: ApiKeyStatus,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == ApiKeyStatus::Active && self.expires_at.map(|e| now < e).unwrap_or(true)
    }
}

/// JWT claims. Deliberately thin: `accessibleOrgIds` and fine-grained
/// permissions are never embedded here — they are recomputed from live
/// membership rows on every request, per the anti-staleness requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub scope: crate::tenancy::Scope,
    pub role_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}
