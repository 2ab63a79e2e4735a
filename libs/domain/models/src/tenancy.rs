//! Partner / Organization / Site / DeviceGroup — the tenancy tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnerType {
    Msp,
    Enterprise,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnerStatus {
    Active,
    Suspended,
    Churned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub kind: PartnerType,
    pub plan: String,
    pub max_organizations: Option<u32>,
    pub max_devices: Option<u32>,
    pub settings: serde_json::Value,
    pub status: PartnerStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationStatus {
    Active,
    Trial,
    Suspended,
    Churned,
}

/// Policy controlling what happens to a device whose mTLS cert has expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpiredCertPolicy {
    Reissue,
    Quarantine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: OrganizationStatus,
    pub max_devices: Option<u32>,
    pub contract_start: Option<DateTime<Utc>>,
    pub contract_end: Option<DateTime<Utc>>,
    pub expired_cert_policy: ExpiredCertPolicy,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub timezone: String,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceGroupType {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGroup {
    pub id: Uuid,
    pub org_id: Uuid,
    pub site_id: Option<Uuid>,
    pub name: String,
    pub kind: DeviceGroupType,
    /// Rule expression over device attributes; only present for `Dynamic` groups.
    pub rule_expression: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Coarse authorization tier carried on every `AuthContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    System,
    Partner,
    Organization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgAccess {
    All,
    Selected,
    None,
}

/// A `(resource, action)` pair, or the `*:*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn wildcard() -> Self {
        Self::new("*", "*")
    }

    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == "*" || self.resource == resource)
            && (self.action == "*" || self.action == action)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: Uuid,
    pub partner_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub scope: Scope,
    pub name: String,
    pub is_system: bool,
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions.iter().any(|p| p.matches(resource, action))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerUser {
    pub partner_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub org_access: OrgAccess,
    pub org_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUser {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub site_ids: Option<Vec<Uuid>>,
    pub device_group_ids: Option<Vec<Uuid>>,
}

/// The set of org ids a caller may address this request. `None` means "all
/// orgs" (system scope); `Some(vec![])` means "none".
///
/// This is recomputed from live membership rows on every request — never
/// cached on a token, never stored between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibleOrgIds(pub Option<Vec<Uuid>>);

impl AccessibleOrgIds {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn none() -> Self {
        Self(Some(Vec::new()))
    }

    pub fn only(org_id: Uuid) -> Self {
        Self(Some(vec![org_id]))
    }

    pub fn selected(org_ids: Vec<Uuid>) -> Self {
        Self(Some(org_ids))
    }

    pub fn contains(&self, org_id: Uuid) -> bool {
        match &self.0 {
            None => true,
            Some(ids) => ids.contains(&org_id),
        }
    }

    /// `true` when every request filtered by this set would return nothing.
    pub fn is_empty_set(&self) -> bool {
        matches!(&self.0, Some(ids) if ids.is_empty())
    }
}

/// Authorization context resolved once per request by the auth middleware
/// and threaded into every domain handler.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: Actor,
    /// The access token's `sid` claim; keys the logout revocation marker.
    /// Meaningless (nil) for non-token actors (agent bearer, API key).
    pub session_id: Uuid,
    pub scope: Scope,
    pub partner_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub role_id: Uuid,
    pub permissions: Vec<Permission>,
    pub accessible_org_ids: AccessibleOrgIds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    User,
    ApiKey,
    Agent,
    System,
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: Uuid,
    pub email: Option<String>,
}

impl AuthContext {
    pub fn can_access_org(&self, org_id: Uuid) -> bool {
        self.accessible_org_ids.contains(org_id)
    }

    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions.iter().any(|p| p.matches(resource, action))
    }
}
