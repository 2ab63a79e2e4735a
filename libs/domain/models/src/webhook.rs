//! Tenant-configured outbound webhooks and delivery records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: Uuid,
    pub org_id: Uuid,
    pub url: String,
    /// HMAC signing secret. Encrypted at rest with the `enc:v1:` prefix;
    /// never present in a list/read response.
    #[serde(skip_serializing)]
    pub secret: String,
    pub events: Vec<String>,
    pub headers: serde_json::Value,
    pub status: WebhookStatus,
    pub retry_policy: RetryPolicy,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub event_id: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Wire shape of the envelope posted to `webhook.url`. Also round-trips
/// through a job payload, hence `Deserialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub org_id: Uuid,
    pub data: serde_json::Value,
}

/// Classification of an HTTP response received while delivering a webhook,
/// independent of the SSRF/transport concerns that live in the infra layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    RetryableFailure,
    PermanentFailure,
}

pub fn classify_status(status: u16) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Delivered,
        408 | 429 => DeliveryOutcome::RetryableFailure,
        400..=499 => DeliveryOutcome::PermanentFailure,
        500..=599 => DeliveryOutcome::RetryableFailure,
        _ => DeliveryOutcome::PermanentFailure,
    }
}
