//! Checksum chaining for the append-only audit log.

use breeze_domain_models::audit::{ActorType, AuditLogEntry, AuditResult};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Builds the checksum for a new audit row: SHA-256 over the row's
/// semantic fields chained with the previous row's checksum, so a tampered
/// historical entry breaks every checksum after it.
#[allow(clippy::too_many_arguments)]
pub fn compute_checksum(
    previous_checksum: &str,
    id: Uuid,
    timestamp: DateTime<Utc>,
    actor_id: Uuid,
    action: &str,
    resource_type: &str,
    resource_id: Option<Uuid>,
    result: AuditResult,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_checksum.as_bytes());
    hasher.update(id.as_bytes());
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hasher.update(actor_id.as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(resource_type.as_bytes());
    if let Some(rid) = resource_id {
        hasher.update(rid.as_bytes());
    }
    hasher.update(format!("{result:?}").as_bytes());
    hex::encode(hasher.finalize())
}

pub struct NewAuditEntry {
    pub org_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub actor_id: Uuid,
    pub actor_email: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub resource_name: Option<String>,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub result: AuditResult,
}

pub fn build_entry(new: NewAuditEntry, previous_checksum: &str, now: DateTime<Utc>) -> AuditLogEntry {
    let id = Uuid::new_v4();
    let checksum = compute_checksum(
        previous_checksum,
        id,
        now,
        new.actor_id,
        &new.action,
        &new.resource_type,
        new.resource_id,
        new.result,
    );
    AuditLogEntry {
        id,
        org_id: new.org_id,
        timestamp: now,
        actor_type: new.actor_type,
        actor_id: new.actor_id,
        actor_email: new.actor_email,
        action: new.action,
        resource_type: new.resource_type,
        resource_id: new.resource_id,
        resource_name: new.resource_name,
        details: new.details,
        ip: new.ip,
        user_agent: new.user_agent,
        result: new.result,
        checksum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_changes_if_any_field_changes() {
        let now = Utc::now();
        let a = compute_checksum("genesis", Uuid::nil(), now, Uuid::nil(), "device.enrolled", "device", None, AuditResult::Success);
        let b = compute_checksum("genesis", Uuid::nil(), now, Uuid::nil(), "device.enrolled", "device", None, AuditResult::Failure);
        assert_ne!(a, b);
    }

    #[test]
    fn checksum_chains_from_previous() {
        let now = Utc::now();
        let a = compute_checksum("genesis", Uuid::nil(), now, Uuid::nil(), "x", "y", None, AuditResult::Success);
        let b = compute_checksum("different-genesis", Uuid::nil(), now, Uuid::nil(), "x", "y", None, AuditResult::Success);
        assert_ne!(a, b);
    }
}
