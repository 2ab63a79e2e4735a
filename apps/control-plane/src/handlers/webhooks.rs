//! Tenant webhook CRUD. Delivery itself happens out-of-band in the webhook
//! worker; creation and test-send both run the SSRF scheme check up front
//! so a misconfigured `http://` or internal URL never reaches the queue.

use axum::extract::{Path, State};
use axum::Json;
use breeze_domain_auth::authorize::{require_org_access, require_permission};
use breeze_domain_models::audit::AuditResult;
use breeze_domain_models::error::ApiError;
use breeze_domain_models::job::{JobKind, RetryPolicy};
use breeze_domain_models::webhook::{Webhook, WebhookStatus};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::AuthedUser;
use crate::state::AppState;

use super::{audit_user_action, HandlerResult};

pub async fn list(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(org_id): Path<Uuid>) -> HandlerResult<Json<Vec<Webhook>>> {
    require_permission(&ctx, "webhook", "read")?;
    require_org_access(&ctx, org_id, "organization")?;
    Ok(Json(state.webhooks.list_for_org(org_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateWebhookRequest {
    pub org_id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub headers: Option<serde_json::Value>,
    /// Overrides the default `{maxRetries: 5, backoffMultiplier: 2.0, ...}`
    /// schedule the delivery worker backs off on for this webhook alone.
    pub retry_policy: Option<RetryPolicy>,
}

pub async fn create(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<CreateWebhookRequest>) -> HandlerResult<Json<Webhook>> {
    require_permission(&ctx, "webhook", "write")?;
    require_org_access(&ctx, req.org_id, "organization")?;

    breeze_domain_webhook::validate_scheme(&req.url).map_err(|e| ApiError::Validation { message: e.to_string(), details: vec![] })?;

    let webhook = Webhook {
        id: Uuid::new_v4(),
        org_id: req.org_id,
        url: req.url,
        secret: breeze_domain_auth::tokens::random_token_hex(32),
        events: req.events,
        headers: req.headers.unwrap_or_else(|| serde_json::json!({})),
        status: WebhookStatus::Active,
        retry_policy: req.retry_policy.unwrap_or_default(),
        success_count: 0,
        failure_count: 0,
        last_delivery_at: None,
        created_at: Utc::now(),
        deleted_at: None,
    };
    state.webhooks.create(&webhook).await?;

    audit_user_action(&state, &ctx, Some(webhook.org_id), "webhook.created", "webhook", Some(webhook.id), AuditResult::Success, serde_json::json!({ "url": webhook.url })).await;
    Ok(Json(webhook))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetWebhookStatusRequest {
    pub status: WebhookStatus,
}

pub async fn set_status(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path(webhook_id): Path<Uuid>,
    Json(req): Json<SetWebhookStatusRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "webhook", "write")?;
    let webhook = state.webhooks.get(webhook_id).await.map_err(|_| ApiError::not_found("webhook"))?;
    require_org_access(&ctx, webhook.org_id, "webhook")?;

    state.webhooks.set_status(webhook_id, req.status).await?;

    audit_user_action(&state, &ctx, Some(webhook.org_id), "webhook.status_changed", "webhook", Some(webhook_id), AuditResult::Success, serde_json::json!({ "status": req.status })).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn delete(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(webhook_id): Path<Uuid>) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "webhook", "delete")?;
    let webhook = state.webhooks.get(webhook_id).await.map_err(|_| ApiError::not_found("webhook"))?;
    require_org_access(&ctx, webhook.org_id, "webhook")?;

    state.webhooks.delete(webhook_id, Utc::now()).await?;

    audit_user_action(&state, &ctx, Some(webhook.org_id), "webhook.deleted", "webhook", Some(webhook_id), AuditResult::Success, serde_json::json!({})).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Enqueues a synthetic `webhook.test` event through the same delivery path
/// as a real one, rather than sending inline, so test sends inherit the
/// SSRF-guarded, redirect-capped transport instead of a second code path.
pub async fn test_send(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(webhook_id): Path<Uuid>) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "webhook", "write")?;
    let webhook = state.webhooks.get(webhook_id).await.map_err(|_| ApiError::not_found("webhook"))?;
    require_org_access(&ctx, webhook.org_id, "webhook")?;

    let envelope = breeze_domain_models::webhook::WebhookEnvelope {
        id: Uuid::new_v4(),
        event_type: "webhook.test".to_string(),
        occurred_at: Utc::now(),
        org_id: webhook.org_id,
        data: serde_json::json!({ "message": "this is a test delivery" }),
    };
    let now = Utc::now();
    let job = breeze_domain_models::job::JobRun {
        id: Uuid::new_v4(),
        kind: JobKind::WebhookDelivery,
        event_id: envelope.id.to_string(),
        payload: serde_json::json!({ "webhookId": webhook_id, "envelope": envelope }),
        status: breeze_domain_models::job::JobStatus::Pending,
        attempts: 0,
        leased_until: None,
        next_retry_at: None,
        last_error: None,
        scheduled_for: now,
        created_at: now,
        completed_at: None,
    };
    state.jobs.enqueue(&job).await?;

    Ok(Json(serde_json::json!({ "queued": true })))
}
