//! Alert rule, channel, and escalation-policy CRUD, plus the operator-facing
//! acknowledge/resolve transitions on fired alerts. Evaluation itself lives
//! in the alert engine background service, not here.

use axum::extract::{Path, State};
use axum::Json;
use breeze_domain_auth::authorize::{require_org_access, require_permission};
use breeze_domain_models::alert::{
    Alert, AlertRule, AlertStatus, AlertTarget, EscalationPolicy, EscalationStep,
    NotificationChannel, NotificationChannelType, Severity,
};
use breeze_domain_models::audit::AuditResult;
use breeze_domain_models::error::ApiError;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::AuthedUser;
use crate::state::AppState;

use super::{audit_user_action, HandlerResult};

pub async fn list_rules(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(org_id): Path<Uuid>) -> HandlerResult<Json<Vec<AlertRule>>> {
    require_permission(&ctx, "alert_rule", "read")?;
    require_org_access(&ctx, org_id, "organization")?;
    Ok(Json(state.alerts.list_rules_for_org(org_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRuleRequest {
    pub org_id: Uuid,
    pub name: String,
    pub severity: Severity,
    pub targets: AlertTarget,
    pub conditions: Vec<breeze_domain_models::alert::AlertCondition>,
    pub cooldown_minutes: u32,
    pub escalation_policy_id: Option<Uuid>,
    pub notification_channel_ids: Vec<Uuid>,
    pub auto_resolve: bool,
}

/// Every channel id and the escalation policy id a rule names must belong to
/// the rule's own org — otherwise a rule in one org could fire notifications
/// through a channel configured (and paid for) by another.
async fn require_same_org_notification_targets(state: &AppState, org_id: Uuid, channel_ids: &[Uuid], escalation_policy_id: Option<Uuid>) -> Result<(), ApiError> {
    if !channel_ids.is_empty() {
        let channels = state.alerts.get_channels(channel_ids).await?;
        let found: std::collections::HashSet<Uuid> = channels.iter().map(|c| c.id).collect();
        for channel_id in channel_ids {
            if !found.contains(channel_id) {
                return Err(ApiError::Validation { message: format!("notification channel {channel_id} not found"), details: vec![] });
            }
        }
        if channels.iter().any(|c| c.org_id != org_id) {
            return Err(ApiError::Validation { message: "notification channel does not belong to this organization".into(), details: vec![] });
        }
    }
    if let Some(policy_id) = escalation_policy_id {
        let policy = state.alerts.get_escalation_policy(policy_id).await.map_err(|_| ApiError::Validation {
            message: format!("escalation policy {policy_id} not found"),
            details: vec![],
        })?;
        if policy.org_id != org_id {
            return Err(ApiError::Validation { message: "escalation policy does not belong to this organization".into(), details: vec![] });
        }
    }
    Ok(())
}

pub async fn create_rule(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<CreateRuleRequest>) -> HandlerResult<Json<AlertRule>> {
    require_permission(&ctx, "alert_rule", "write")?;
    require_org_access(&ctx, req.org_id, "organization")?;
    require_same_org_notification_targets(&state, req.org_id, &req.notification_channel_ids, req.escalation_policy_id).await?;

    let rule = AlertRule {
        id: Uuid::new_v4(),
        org_id: req.org_id,
        name: req.name,
        severity: req.severity,
        enabled: true,
        targets: req.targets,
        conditions: req.conditions,
        cooldown_minutes: req.cooldown_minutes,
        escalation_policy_id: req.escalation_policy_id,
        notification_channel_ids: req.notification_channel_ids,
        auto_resolve: req.auto_resolve,
        deleted_at: None,
    };
    state.alerts.create_rule(&rule).await?;

    audit_user_action(&state, &ctx, Some(rule.org_id), "alert_rule.created", "alert_rule", Some(rule.id), AuditResult::Success, serde_json::json!({ "name": rule.name })).await;
    Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetRuleEnabledRequest {
    pub enabled: bool,
}

pub async fn set_rule_enabled(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path(rule_id): Path<Uuid>,
    Json(req): Json<SetRuleEnabledRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "alert_rule", "write")?;
    let rule = state.alerts.get_rule(rule_id).await.map_err(|_| ApiError::not_found("alert_rule"))?;
    require_org_access(&ctx, rule.org_id, "alert_rule")?;

    state.alerts.set_rule_enabled(rule_id, req.enabled).await?;

    audit_user_action(&state, &ctx, Some(rule.org_id), "alert_rule.enabled_changed", "alert_rule", Some(rule_id), AuditResult::Success, serde_json::json!({ "enabled": req.enabled })).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn delete_rule(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(rule_id): Path<Uuid>) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "alert_rule", "delete")?;
    let rule = state.alerts.get_rule(rule_id).await.map_err(|_| ApiError::not_found("alert_rule"))?;
    require_org_access(&ctx, rule.org_id, "alert_rule")?;

    state.alerts.delete_rule(rule_id, Utc::now()).await?;

    audit_user_action(&state, &ctx, Some(rule.org_id), "alert_rule.deleted", "alert_rule", Some(rule_id), AuditResult::Success, serde_json::json!({})).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn list_alerts(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(org_id): Path<Uuid>) -> HandlerResult<Json<Vec<Alert>>> {
    require_permission(&ctx, "alert", "read")?;
    require_org_access(&ctx, org_id, "organization")?;
    Ok(Json(state.alerts.list_alerts_for_org(org_id).await?))
}

/// `active -> acknowledged`, `active -> resolved`, `acknowledged ->
/// resolved`, `active -> suppressed`, `suppressed -> active`; anything else
/// is rejected by `AlertStatus::can_transition_to` before the write.
pub async fn transition_alert(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path((alert_id, next_status)): Path<(Uuid, AlertStatus)>,
) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "alert", "write")?;
    let alert = state.alerts.get_alert(alert_id).await.map_err(|_| ApiError::not_found("alert"))?;
    require_org_access(&ctx, alert.org_id, "alert")?;

    if !alert.status.can_transition_to(next_status) {
        return Err(ApiError::Validation {
            message: format!("cannot transition alert from {:?} to {:?}", alert.status, next_status),
            details: vec![],
        }
        .into());
    }

    let actor = match next_status {
        AlertStatus::Acknowledged | AlertStatus::Resolved => Some(ctx.actor.id),
        _ => None,
    };
    state.alerts.transition(alert_id, next_status, actor, Utc::now()).await?;

    audit_user_action(
        &state,
        &ctx,
        Some(alert.org_id),
        "alert.status_changed",
        "alert",
        Some(alert_id),
        AuditResult::Success,
        serde_json::json!({ "status": next_status }),
    )
    .await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn list_channels(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(org_id): Path<Uuid>) -> HandlerResult<Json<Vec<NotificationChannel>>> {
    require_permission(&ctx, "notification_channel", "read")?;
    require_org_access(&ctx, org_id, "organization")?;
    Ok(Json(state.alerts.list_channels_for_org(org_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub org_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationChannelType,
    pub config: serde_json::Value,
}

/// Every channel kind has a minimal shape its dispatcher depends on; a
/// channel accepted with the wrong config just fails silently the first
/// time an alert tries to fire through it, long after the operator who
/// misconfigured it has moved on.
fn validate_channel_config(kind: NotificationChannelType, config: &serde_json::Value) -> Result<(), ApiError> {
    let require_str = |field: &str| -> Result<&str, ApiError> {
        config.get(field).and_then(|v| v.as_str()).filter(|s| !s.is_empty()).ok_or_else(|| ApiError::Validation {
            message: format!("{kind:?} channel config requires a non-empty \"{field}\""),
            details: vec![],
        })
    };
    match kind {
        NotificationChannelType::Webhook => {
            let url = require_str("url")?;
            breeze_domain_webhook::validate_scheme(url).map_err(|e| ApiError::Validation { message: e.to_string(), details: vec![] })?;
        }
        NotificationChannelType::Slack | NotificationChannelType::Teams => {
            let url = require_str("webhookUrl")?;
            breeze_domain_webhook::validate_scheme(url).map_err(|e| ApiError::Validation { message: e.to_string(), details: vec![] })?;
        }
        NotificationChannelType::Email => {
            require_str("to")?;
        }
        NotificationChannelType::Pagerduty => {
            require_str("integrationKey")?;
        }
        NotificationChannelType::Sms => {
            require_str("phoneNumber")?;
        }
        NotificationChannelType::Inapp => {}
    }
    Ok(())
}

pub async fn create_channel(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<CreateChannelRequest>) -> HandlerResult<Json<NotificationChannel>> {
    require_permission(&ctx, "notification_channel", "write")?;
    require_org_access(&ctx, req.org_id, "organization")?;
    validate_channel_config(req.kind, &req.config)?;

    let channel = NotificationChannel {
        id: Uuid::new_v4(),
        org_id: req.org_id,
        kind: req.kind,
        config: req.config,
        enabled: true,
        deleted_at: None,
    };
    state.alerts.create_channel(&channel).await?;

    audit_user_action(&state, &ctx, Some(channel.org_id), "notification_channel.created", "notification_channel", Some(channel.id), AuditResult::Success, serde_json::json!({ "type": channel.kind })).await;
    Ok(Json(channel))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreatePolicyRequest {
    pub org_id: Uuid,
    pub name: String,
    pub steps: Vec<EscalationStep>,
}

pub async fn list_policies(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(org_id): Path<Uuid>) -> HandlerResult<Json<Vec<EscalationPolicy>>> {
    require_permission(&ctx, "escalation_policy", "read")?;
    require_org_access(&ctx, org_id, "organization")?;
    Ok(Json(state.alerts.list_policies_for_org(org_id).await?))
}

pub async fn create_policy(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<CreatePolicyRequest>) -> HandlerResult<Json<EscalationPolicy>> {
    require_permission(&ctx, "escalation_policy", "write")?;
    require_org_access(&ctx, req.org_id, "organization")?;

    let policy = EscalationPolicy { id: Uuid::new_v4(), org_id: req.org_id, name: req.name, steps: req.steps };
    state.alerts.create_escalation_policy(&policy).await?;

    audit_user_action(&state, &ctx, Some(policy.org_id), "escalation_policy.created", "escalation_policy", Some(policy.id), AuditResult::Success, serde_json::json!({ "name": policy.name })).await;
    Ok(Json(policy))
}
