//! Durable job queue records. One row per unit of at-least-once work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed job taxonomy; each kind gets its own bounded worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    WebhookDelivery,
    Notification,
    DeploymentFanout,
    PatchFanout,
    CertRenewalSweep,
    EscalationStep,
    ArchivalRetention,
}

impl JobKind {
    pub fn env_var(self) -> &'static str {
        match self {
            JobKind::WebhookDelivery => "WORKER_CONCURRENCY_WEBHOOK_DELIVERY",
            JobKind::Notification => "WORKER_CONCURRENCY_NOTIFICATION",
            JobKind::DeploymentFanout => "WORKER_CONCURRENCY_DEPLOYMENT_FANOUT",
            JobKind::PatchFanout => "WORKER_CONCURRENCY_PATCH_FANOUT",
            JobKind::CertRenewalSweep => "WORKER_CONCURRENCY_CERT_RENEWAL_SWEEP",
            JobKind::EscalationStep => "WORKER_CONCURRENCY_ESCALATION_STEP",
            JobKind::ArchivalRetention => "WORKER_CONCURRENCY_ARCHIVAL_RETENTION",
        }
    }

    pub const ALL: [JobKind; 7] = [
        JobKind::WebhookDelivery,
        JobKind::Notification,
        JobKind::DeploymentFanout,
        JobKind::PatchFanout,
        JobKind::CertRenewalSweep,
        JobKind::EscalationStep,
        JobKind::ArchivalRetention,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Leased,
    Completed,
    Failed,
    DeadLetter,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: Uuid,
    pub kind: JobKind,
    /// Stable identifier carried by the payload so a replayed job has the
    /// same effect: insert-or-ignore, update-if-equal-version.
    pub event_id: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub leased_until: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// `{maxRetries, backoffMultiplier, initialDelay, maxDelay}` — attached to a
/// webhook, but the same shape drives retry scheduling for every job kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub initial_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_multiplier: 2.0,
            initial_delay_ms: 1_000,
            max_delay_ms: 15 * 60 * 1_000,
        }
    }
}

impl RetryPolicy {
    /// `nextRetryAt = now + min(maxDelay, initialDelay * backoffMultiplier^attempts)`
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let scaled = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempts as i32);
        let delay_ms = scaled.min(self.max_delay_ms as f64) as i64;
        now + chrono::Duration::milliseconds(delay_ms)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_retries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFanoutPayload {
    pub targets: Vec<Uuid>,
    pub action: String,
    pub payload: serde_json::Value,
    pub issued_by: Uuid,
}

/// Per-target outcome of one `DeploymentFanout`/`PatchFanout` job. One row
/// is seeded per target device when the fanout worker first picks up the
/// job; `Dispatched` means a `DeviceCommand` exists and is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResultStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
}

impl JobResultStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobResultStatus::Succeeded | JobResultStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub org_id: Uuid,
    pub device_id: Uuid,
    pub command_id: Option<Uuid>,
    pub status: JobResultStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
