//! Remote desktop/terminal/file-transfer session mediation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSessionType {
    Terminal,
    Desktop,
    FileTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSessionStatus {
    Pending,
    Connecting,
    Active,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    pub id: Uuid,
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    #[serde(rename = "type")]
    pub kind: RemoteSessionType,
    pub status: RemoteSessionStatus,
    pub offer: Option<String>,
    pub answer: Option<String>,
    pub ice_candidates: Vec<IceCandidate>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub bytes_transferred: u64,
}

impl RemoteSession {
    /// Only the owning user may mutate `offer`/`answer`/`ice`/`end`.
    pub fn owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    pub fn is_stale(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        !matches!(
            self.status,
            RemoteSessionStatus::Disconnected | RemoteSessionStatus::Failed
        ) && now - self.last_activity_at > idle_timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransfer {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub direction: TransferDirection,
    pub remote_path: String,
    pub size: u64,
    pub status: TransferStatus,
    pub progress_percent: u8,
}

/// Signaling messages relayed verbatim between the owning user's WS
/// connection and the agent's WS connection; the server never decodes the
/// media payload they carry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Ice { candidate: IceCandidate },
    Progress { bytes_transferred: u64 },
    End,
}
