//! Object key layout: `{orgId}/{kind}/{yyyymm}/{id}`. Grouping by org first
//! keeps every blob under a tenant beneath one prefix, which is what the
//! `accessibleOrgIds` check before any path-based access relies on.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Script,
    AgentBinary,
    ReportExport,
    FileTransfer,
}

impl BlobKind {
    fn as_str(self) -> &'static str {
        match self {
            BlobKind::Script => "script",
            BlobKind::AgentBinary => "agent-binary",
            BlobKind::ReportExport => "report-export",
            BlobKind::FileTransfer => "file-transfer",
        }
    }
}

pub fn object_key(org_id: Uuid, kind: BlobKind, created_at: DateTime<Utc>, id: Uuid) -> String {
    format!("{org_id}/{}/{}/{id}", kind.as_str(), created_at.format("%Y%m"))
}

/// The org id a key was minted under, recovered by splitting on `/`. Used
/// to cross-check a caller's `accessibleOrgIds` against the key itself
/// before any read/write, independent of whatever org id the request body
/// claims.
pub fn org_id_from_key(key: &str) -> Option<Uuid> {
    key.split('/').next().and_then(|s| Uuid::parse_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_layout_matches_spec() {
        let org_id = Uuid::nil();
        let id = Uuid::nil();
        let created_at = Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap();
        let key = object_key(org_id, BlobKind::FileTransfer, created_at, id);
        assert_eq!(key, format!("{org_id}/file-transfer/202603/{id}"));
    }

    #[test]
    fn org_id_roundtrips_from_key() {
        let org_id = Uuid::new_v4();
        let key = object_key(org_id, BlobKind::Script, Utc::now(), Uuid::new_v4());
        assert_eq!(org_id_from_key(&key), Some(org_id));
    }

    #[test]
    fn malformed_key_yields_none() {
        assert_eq!(org_id_from_key("not-a-uuid/script/202603/x"), None);
    }
}
