//! Operator-facing device inventory and command dispatch. Every listing and
//! lookup is filtered through `org_filter`/`require_org_access` — there is
//! no endpoint here that trusts a path-supplied org id over the caller's
//! own `accessibleOrgIds`.

use axum::extract::{Path, State};
use axum::Json;
use breeze_domain_auth::authorize::{org_filter, require_org_access, require_permission, OrgFilter};
use breeze_domain_models::audit::AuditResult;
use breeze_domain_models::command::{CommandType, DeviceCommand};
use breeze_domain_models::device::{Device, DeviceStatus};
use breeze_domain_models::error::ApiError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

use super::{audit_user_action, HandlerResult};
use crate::middleware::AuthedUser;

pub async fn list(State(state): State<AppState>, AuthedUser(ctx): AuthedUser) -> HandlerResult<Json<Vec<Device>>> {
    require_permission(&ctx, "device", "read")?;
    let devices = match org_filter(&ctx) {
        OrgFilter::AlwaysTrue => state.devices.list_all().await?,
        OrgFilter::AlwaysFalse => Vec::new(),
        OrgFilter::In(ids) => state.devices.list_for_orgs(&ids).await?,
    };
    Ok(Json(devices))
}

pub async fn get(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(device_id): Path<Uuid>) -> HandlerResult<Json<Device>> {
    require_permission(&ctx, "device", "read")?;
    let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;
    Ok(Json(device))
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PatchDeviceRequest {
    pub display_name: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub async fn patch(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path(device_id): Path<Uuid>,
    Json(req): Json<PatchDeviceRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "device", "write")?;
    let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;

    state.devices.update_details(device_id, req.display_name.as_deref(), req.tags.as_deref()).await?;

    audit_user_action(&state, &ctx, Some(device.org_id), "device.updated", "device", Some(device_id), AuditResult::Success, serde_json::json!(req)).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn delete(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(device_id): Path<Uuid>) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "device", "delete")?;
    let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;

    state.devices.soft_delete(device_id, Utc::now()).await?;

    audit_user_action(&state, &ctx, Some(device.org_id), "device.deleted", "device", Some(device_id), AuditResult::Success, serde_json::json!({})).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetStatusRequest {
    pub status: DeviceStatus,
}

pub async fn set_status(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path(device_id): Path<Uuid>,
    Json(req): Json<SetStatusRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "device", "write")?;
    let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;

    if !device.status.can_transition_to(req.status) {
        return Err(ApiError::Validation {
            message: format!("cannot transition device from {:?} to {:?}", device.status, req.status),
            details: vec![],
        }
        .into());
    }

    state.devices.set_status(device_id, &req.status).await?;

    audit_user_action(&state, &ctx, Some(device.org_id), "device.status_changed", "device", Some(device_id), AuditResult::Success, serde_json::json!({ "status": req.status })).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `maintenance/toggle` is sugar over `set_status` that also emits a
/// `device.maintenance.set` command, since entering maintenance mode
/// silences the agent's own alerting too.
pub async fn toggle_maintenance(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path(device_id): Path<Uuid>,
) -> HandlerResult<Json<serde_json::Value>> {
    require_permission(&ctx, "device", "write")?;
    let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;

    let (next_status, enabled) = match device.status {
        DeviceStatus::Maintenance => (DeviceStatus::Online, false),
        _ if device.status.can_transition_to(DeviceStatus::Maintenance) => (DeviceStatus::Maintenance, true),
        _ => {
            return Err(ApiError::Validation {
                message: format!("device in status {:?} cannot enter maintenance mode", device.status),
                details: vec![],
            }
            .into())
        }
    };

    state.devices.set_status(device_id, &next_status).await?;
    enqueue_command(&state, &ctx, &device, CommandType::DeviceMaintenanceSet, serde_json::json!({ "enabled": enabled })).await?;

    audit_user_action(&state, &ctx, Some(device.org_id), "device.maintenance_toggled", "device", Some(device_id), AuditResult::Success, serde_json::json!({ "enabled": enabled })).await;
    Ok(Json(serde_json::json!({ "maintenance": enabled })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IssueCommandRequest {
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub payload: serde_json::Value,
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCommandResponse {
    pub command_id: Uuid,
}

async fn enqueue_command(state: &AppState, ctx: &breeze_domain_models::tenancy::AuthContext, device: &Device, kind: CommandType, payload: serde_json::Value) -> Result<DeviceCommand, ApiError> {
    if kind.is_serialized() && state.commands.has_in_flight_of_kind(device.id, kind).await? {
        return Err(ApiError::Conflict(format!("a {kind:?} command is already in flight for this device")));
    }

    let now = Utc::now();
    let command = DeviceCommand {
        id: Uuid::new_v4(),
        device_id: device.id,
        org_id: device.org_id,
        kind,
        payload,
        status: breeze_domain_models::command::CommandStatus::Pending,
        exit_code: None,
        stdout: None,
        stderr: None,
        issued_by: ctx.actor.id,
        issued_at: now,
        started_at: None,
        completed_at: None,
        expires_at: now + chrono::Duration::minutes(10),
    };
    state.commands.enqueue(&command).await?;
    Ok(command)
}

pub async fn issue_command(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path(device_id): Path<Uuid>,
    Json(req): Json<IssueCommandRequest>,
) -> HandlerResult<Json<IssueCommandResponse>> {
    require_permission(&ctx, "command", "issue")?;
    let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;

    let command = enqueue_command(&state, &ctx, &device, req.kind, req.payload).await?;

    audit_user_action(
        &state,
        &ctx,
        Some(device.org_id),
        "command.issued",
        "device_command",
        Some(command.id),
        AuditResult::Success,
        serde_json::json!({ "type": req.kind, "deviceId": device.id }),
    )
    .await;
    Ok(Json(IssueCommandResponse { command_id: command.id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkCommandRequest {
    pub device_ids: Vec<Uuid>,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCommandResult {
    pub device_id: Uuid,
    pub command_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Best-effort fan-out: one device failing (not found, out of scope,
/// serialized collision) never aborts the rest of the batch, since an
/// operator targeting a site-wide reboot expects partial success to be
/// reported per-device, not to roll back the whole request.
pub async fn bulk_command(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<BulkCommandRequest>) -> HandlerResult<Json<Vec<BulkCommandResult>>> {
    require_permission(&ctx, "command", "issue")?;

    let mut results = Vec::with_capacity(req.device_ids.len());
    for device_id in req.device_ids {
        let outcome = async {
            let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("device"))?;
            require_org_access(&ctx, device.org_id, "device")?;
            enqueue_command(&state, &ctx, &device, req.kind, req.payload.clone()).await
        }
        .await;

        match outcome {
            Ok(command) => results.push(BulkCommandResult { device_id, command_id: Some(command.id), error: None }),
            Err(e) => results.push(BulkCommandResult { device_id, command_id: None, error: Some(e.to_string()) }),
        }
    }

    audit_user_action(&state, &ctx, ctx.org_id, "command.bulk_issued", "device_command", None, AuditResult::Success, serde_json::json!({ "type": req.kind, "count": results.len() })).await;
    Ok(Json(results))
}

pub async fn get_command(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(command_id): Path<Uuid>) -> HandlerResult<Json<DeviceCommand>> {
    require_permission(&ctx, "command", "read")?;
    let command = state.commands.get(command_id).await.map_err(|_| ApiError::not_found("command"))?;
    require_org_access(&ctx, command.org_id, "command")?;
    Ok(Json(command))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FanoutRequest {
    pub device_ids: Vec<Uuid>,
    pub action: CommandType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutResponse {
    pub job_id: Uuid,
}

/// A deployment/patch rollout across many devices at once. Unlike
/// `bulk_command`, which dispatches every target inline on the request and
/// reports per-device success/failure synchronously, this hands the whole
/// batch to the job queue: the `fanout_worker` dispatches one command per
/// target as its own background step, and `sweeper::sweep_fanout_completions`
/// reports back once every target has reached a terminal state.
pub async fn fanout(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<FanoutRequest>) -> HandlerResult<Json<FanoutResponse>> {
    require_permission(&ctx, "command", "issue")?;
    if req.device_ids.is_empty() {
        return Err(ApiError::Validation { message: "deviceIds must not be empty".into(), details: vec![] }.into());
    }

    let mut org_id = None;
    for device_id in &req.device_ids {
        let device = state.devices.get_by_id(*device_id).await.map_err(|_| ApiError::not_found("device"))?;
        require_org_access(&ctx, device.org_id, "device")?;
        match org_id {
            None => org_id = Some(device.org_id),
            Some(existing) if existing != device.org_id => {
                return Err(ApiError::Validation { message: "fanout targets must all belong to the same org".into(), details: vec![] }.into());
            }
            _ => {}
        }
    }
    let org_id = org_id.expect("checked non-empty above");

    let kind = if matches!(req.action, CommandType::PatchInstall | CommandType::PatchRollback) {
        breeze_domain_models::job::JobKind::PatchFanout
    } else {
        breeze_domain_models::job::JobKind::DeploymentFanout
    };
    let action = serde_json::to_value(req.action).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();

    let job_id = Uuid::new_v4();
    let now = Utc::now();
    let job = breeze_domain_models::job::JobRun {
        id: job_id,
        kind,
        event_id: format!("fanout:{job_id}"),
        payload: serde_json::to_value(breeze_domain_models::job::DeploymentFanoutPayload {
            targets: req.device_ids.clone(),
            action,
            payload: req.payload.clone(),
            issued_by: ctx.actor.id,
        })
        .unwrap_or_default(),
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

    audit_user_action(
        &state,
        &ctx,
        Some(org_id),
        "device.fanout_issued",
        "job",
        Some(job_id),
        AuditResult::Success,
        serde_json::json!({ "action": req.action, "targetCount": req.device_ids.len() }),
    )
    .await;
    Ok(Json(FanoutResponse { job_id }))
}
