//! Drains `JobKind::WebhookDelivery` jobs: looks up the webhook, delivers
//! the envelope through the SSRF-guarded transport, records the outcome
//! against both the webhook's own counters and its delivery log, and
//! reports back to the `JobRunner` so it can retry or dead-letter.

use std::time::Duration;

use breeze_domain_models::job::JobKind;
use breeze_domain_models::webhook::{DeliveryOutcome, DeliveryStatus, Webhook, WebhookDelivery, WebhookEnvelope};
use breeze_infra_queue::{deliver, JobOutcome, JobRunner, QueueError};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

const BATCH_SIZE: i64 = 20;
const LEASE_SECONDS: i64 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

fn concurrency() -> usize {
    std::env::var(JobKind::WebhookDelivery.env_var()).ok().and_then(|v| v.parse().ok()).unwrap_or(4)
}

/// The webhook's own `retryPolicy`, keyed off the `webhookId` every
/// `WebhookDelivery` job payload carries; falls back to the default
/// schedule if the webhook has since been deleted out from under a retry.
async fn retry_policy_for(state: &AppState, payload: &serde_json::Value) -> breeze_domain_models::job::RetryPolicy {
    let Some(webhook_id) = payload.get("webhookId").and_then(|v| v.as_str()).and_then(|s| s.parse::<Uuid>().ok()) else {
        return breeze_domain_models::job::RetryPolicy::default();
    };
    state.webhooks.get(webhook_id).await.map(|w| w.retry_policy).unwrap_or_default()
}

fn extra_headers(webhook: &Webhook) -> Vec<(String, String)> {
    webhook
        .headers
        .as_object()
        .map(|map| map.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default()
}

async fn deliver_one(state: &AppState, job_id: Uuid, payload: serde_json::Value) -> JobOutcome {
    let Some(webhook_id) = payload.get("webhookId").and_then(|v| v.as_str()).and_then(|s| s.parse::<Uuid>().ok()) else {
        return JobOutcome::Poison { error: "job payload missing webhookId".into() };
    };
    let envelope: WebhookEnvelope = match payload.get("envelope").cloned().map(serde_json::from_value) {
        Some(Ok(envelope)) => envelope,
        _ => return JobOutcome::Poison { error: "job payload missing or malformed envelope".into() },
    };

    let webhook = match state.webhooks.get(webhook_id).await {
        Ok(webhook) => webhook,
        Err(_) => return JobOutcome::Poison { error: format!("webhook {webhook_id} no longer exists") },
    };
    if webhook.status != breeze_domain_models::webhook::WebhookStatus::Active {
        info!(%webhook_id, %job_id, "skipping delivery for disabled webhook");
        return JobOutcome::Completed;
    }

    let delivery = match state.webhooks.get_delivery_for_event(webhook_id, &envelope.id.to_string()).await {
        Ok(Some(existing)) if existing.status == DeliveryStatus::Delivered => return JobOutcome::Completed,
        Ok(Some(existing)) => existing,
        Ok(None) => {
            let fresh = WebhookDelivery {
                id: Uuid::new_v4(),
                webhook_id,
                event_type: envelope.event_type.clone(),
                event_id: envelope.id.to_string(),
                payload: serde_json::to_value(&envelope).unwrap_or_default(),
                status: DeliveryStatus::Pending,
                attempts: 0,
                next_retry_at: None,
                response_status: None,
                response_body: None,
                response_time_ms: None,
                error: None,
                created_at: Utc::now(),
            };
            if let Err(e) = state.webhooks.record_delivery_attempt(&fresh).await {
                return JobOutcome::Retry { error: e.to_string() };
            }
            fresh
        }
        Err(e) => return JobOutcome::Retry { error: e.to_string() },
    };

    let raw_body = match serde_json::to_vec(&envelope) {
        Ok(body) => body,
        Err(e) => return JobOutcome::Poison { error: e.to_string() },
    };

    let now = Utc::now();
    match deliver(&webhook, &envelope.event_type, delivery.id, &raw_body, &extra_headers(&webhook)).await {
        Ok(result) => {
            let delivered = result.outcome == DeliveryOutcome::Delivered;
            let status = match result.outcome {
                DeliveryOutcome::Delivered => DeliveryStatus::Delivered,
                DeliveryOutcome::RetryableFailure | DeliveryOutcome::PermanentFailure => DeliveryStatus::Failed,
            };
            if let Err(e) = state
                .webhooks
                .update_delivery_result(delivery.id, status, result.response_status, Some(result.response_time_ms), result.error.as_deref(), None)
                .await
            {
                return JobOutcome::Retry { error: e.to_string() };
            }
            if let Err(e) = state.webhooks.record_outcome(webhook_id, delivered, now).await {
                warn!(%webhook_id, error = %e, "failed to update webhook delivery counters");
            }

            match result.outcome {
                DeliveryOutcome::Delivered => JobOutcome::Completed,
                DeliveryOutcome::RetryableFailure => JobOutcome::Retry { error: format!("response status {:?}", result.response_status) },
                DeliveryOutcome::PermanentFailure => JobOutcome::Poison { error: format!("non-retryable response status {:?}", result.response_status) },
            }
        }
        Err(e) => {
            let _ = state.webhooks.record_outcome(webhook_id, false, now).await;
            match e {
                QueueError::Ssrf(_) | QueueError::InvalidUrl(_) => JobOutcome::Poison { error: e.to_string() },
                QueueError::Dns { .. } | QueueError::NoAddress(_) | QueueError::Http(_) => JobOutcome::Retry { error: e.to_string() },
                other => JobOutcome::Retry { error: other.to_string() },
            }
        }
    }
}

pub fn spawn_webhook_worker(state: AppState) {
    let lane_count = concurrency();
    for lane in 0..lane_count {
        let state = state.clone();
        tokio::spawn(async move {
            let runner = JobRunner::new((*state.jobs).clone(), JobKind::WebhookDelivery, chrono::Duration::seconds(LEASE_SECONDS));
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let state = state.clone();
                let retry_state = state.clone();
                match runner
                    .run_once_with_retry_policy(
                        BATCH_SIZE,
                        Utc::now(),
                        move |job_id, payload| {
                            let state = state.clone();
                            async move { deliver_one(&state, job_id, payload).await }
                        },
                        move |payload| {
                            let state = retry_state.clone();
                            let payload = payload.clone();
                            async move { retry_policy_for(&state, &payload).await }
                        },
                    )
                    .await
                {
                    Ok(drained) if drained > 0 => info!(lane, drained, "webhook worker drained batch"),
                    Ok(_) => {}
                    Err(e) => warn!(lane, error = %e, "webhook worker batch failed"),
                }
            }
        });
    }
}
