//! Managed endpoints and their mTLS certificate lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Windows,
    Darwin,
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Maintenance,
    Decommissioned,
    Quarantined,
}

impl DeviceStatus {
    /// Valid forward transitions, per the state machine in the device
    /// lifecycle design. `quarantined` is reachable only via the
    /// cert-expiry path (not a direct operator transition), and can only be
    /// left by an explicit operator approve/deny.
    pub fn can_transition_to(self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;
        matches!(
            (self, next),
            (Offline, Online)
                | (Online, Offline)
                | (Online, Maintenance)
                | (Maintenance, Online)
                | (Maintenance, Offline)
                | (Online, Decommissioned)
                | (Offline, Decommissioned)
                | (Maintenance, Decommissioned)
                | (Quarantined, Online)
                | (Quarantined, Decommissioned)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCertificate {
    pub serial: String,
    pub external_cert_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DeviceCertificate {
    /// `renewCert=true` is signaled once two-thirds of the cert's lifetime
    /// has elapsed.
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        let lifetime = self.expires_at - self.issued_at;
        let two_thirds = self.issued_at + (lifetime * 2) / 3;
        now >= two_thirds
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: Uuid,
    pub org_id: Uuid,
    pub site_id: Uuid,
    /// Globally unique opaque identifier presented by the agent on every
    /// authenticated call; distinct from `id` so it can be rotated without
    /// changing the device's primary key.
    pub agent_id: String,
    pub hostname: String,
    pub display_name: String,
    pub os_type: OsType,
    pub os_version: String,
    pub architecture: String,
    pub agent_version: String,
    pub status: DeviceStatus,
    #[serde(skip_serializing)]
    pub agent_token_hash: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub certificate: Option<DeviceCertificate>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Device {
    /// A heartbeat later than `3 * interval` means the device is offline.
    pub fn is_stale(&self, now: DateTime<Utc>, heartbeat_interval: chrono::Duration) -> bool {
        match self.last_seen_at {
            None => true,
            Some(last) => now - last > heartbeat_interval * 3,
        }
    }
}

/// Binds an enrollment key to a target org/site so an enrolling agent never
/// gets to pick where it lands; the key itself gates single- or
/// limited-use access and an optional expiry/revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentKey {
    pub id: Uuid,
    pub org_id: Uuid,
    pub site_id: Uuid,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub max_uses: Option<u32>,
    pub use_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EnrollmentKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return false;
            }
        }
        match self.max_uses {
            Some(max) => self.use_count < max,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInventory {
    pub device_id: Uuid,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<u32>,
    pub memory_total_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub device_id: Uuid,
    pub name: String,
    pub mac_address: Option<String>,
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareInventoryEntry {
    pub device_id: Uuid,
    pub name: String,
    pub version: String,
    pub installed_at: Option<DateTime<Utc>>,
}

/// One installed package as reported by the agent; `device_id` and
/// `installed_at` are filled in server-side before the entry is persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SoftwareInventoryItem {
    pub name: String,
    pub version: String,
}

/// Heartbeat payload an agent posts every `interval` seconds (default 60).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub auth_token: String,
    pub metrics: serde_json::Value,
    pub status_summary: String,
    pub agent_version: String,
    pub pending_reboot: bool,
    /// Full installed-package snapshot, when the agent collects one. Absent
    /// means "unchanged since last report" — the heartbeat won't touch the
    /// stored inventory or evaluate `software_change` this cycle.
    #[serde(default)]
    pub software: Option<Vec<SoftwareInventoryItem>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub commands: Vec<crate::command::DeviceCommand>,
    pub config_update: Option<serde_json::Value>,
    pub upgrade_to: Option<String>,
    pub renew_cert: bool,
}
