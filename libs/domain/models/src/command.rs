//! Agent-directed commands and their result-reconciliation lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Queued,
    Sent,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed
                | CommandStatus::Failed
                | CommandStatus::Timeout
                | CommandStatus::Cancelled
        )
    }
}

/// Closed command taxonomy. `script.execute`/`script.cancel` carry a
/// caller-supplied script id in `payload`; everything else is a fixed shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    #[serde(rename = "script.execute")]
    ScriptExecute,
    #[serde(rename = "script.cancel")]
    ScriptCancel,
    #[serde(rename = "device.reboot")]
    DeviceReboot,
    #[serde(rename = "device.shutdown")]
    DeviceShutdown,
    #[serde(rename = "device.maintenance.set")]
    DeviceMaintenanceSet,
    #[serde(rename = "software.install")]
    SoftwareInstall,
    #[serde(rename = "software.uninstall")]
    SoftwareUninstall,
    #[serde(rename = "software.update")]
    SoftwareUpdate,
    #[serde(rename = "patch.install")]
    PatchInstall,
    #[serde(rename = "patch.rollback")]
    PatchRollback,
    #[serde(rename = "security.scan")]
    SecurityScan,
    #[serde(rename = "security.quarantine")]
    SecurityQuarantine,
    #[serde(rename = "security.remove")]
    SecurityRemove,
    #[serde(rename = "security.restore")]
    SecurityRestore,
    #[serde(rename = "remote.connect_ws")]
    RemoteConnectWs,
    #[serde(rename = "config.update")]
    ConfigUpdate,
    #[serde(rename = "agent.upgrade")]
    AgentUpgrade,
    #[serde(rename = "management.refresh_posture")]
    ManagementRefreshPosture,
}

impl CommandType {
    /// Commands of a "serialized" kind may have at most one in-flight
    /// instance per device at a time.
    pub fn is_serialized(self) -> bool {
        matches!(
            self,
            CommandType::DeviceReboot
                | CommandType::DeviceShutdown
                | CommandType::PatchInstall
                | CommandType::PatchRollback
                | CommandType::AgentUpgrade
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    pub id: Uuid,
    pub device_id: Uuid,
    pub org_id: Uuid,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub issued_by: Uuid,
    pub issued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl DeviceCommand {
    /// `exitCode == 0` is the sole definition of "succeeded"; there is no
    /// separate boolean field to conflate it with.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.expires_at
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandResultRequest {
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub duration_ms: u64,
    /// The agent's own retry counter for this command, starting at 0. A
    /// result posted with an `attempt` no newer than the one already
    /// recorded is a duplicate delivery and is accepted without reapplying.
    #[serde(default)]
    pub attempt: u32,
}
