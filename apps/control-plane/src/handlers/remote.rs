//! Remote desktop/terminal/file-transfer session lifecycle. `offer`,
//! `answer`, `ice`, and `end` are owner-only; `progress` on a transfer
//! accepts either the owning user or that transfer's own agent
//! (authenticated via bearer token), since the agent side reports
//! transfer progress directly over the data channel.

use axum::extract::{Path, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::Json;
use breeze_domain_auth::authorize::{require_org_access, require_permission};
use breeze_domain_auth::tokens;
use breeze_domain_models::audit::AuditResult;
use breeze_domain_models::command::{CommandStatus, CommandType, DeviceCommand};
use breeze_domain_models::error::ApiError;
use breeze_domain_models::session::{FileTransfer, IceCandidate, RemoteSession, RemoteSessionStatus, RemoteSessionType, SignalingMessage, TransferDirection, TransferStatus};
use breeze_domain_models::tenancy::AuthContext;
use breeze_domain_session::ownership::{authorize_signal, Caller};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::{resolve_auth_context, AuthedUser};
use crate::state::AppState;

use super::{audit_user_action, HandlerResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub device_id: Uuid,
    #[serde(rename = "type")]
    pub kind: RemoteSessionType,
}

pub async fn create(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<CreateSessionRequest>) -> HandlerResult<Json<RemoteSession>> {
    require_permission(&ctx, "remote_session", "write")?;

    let device = state.devices.get_by_id(req.device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;

    let now = Utc::now();
    let session = RemoteSession {
        id: Uuid::new_v4(),
        device_id: device.id,
        user_id: ctx.actor.id,
        org_id: device.org_id,
        kind: req.kind,
        status: RemoteSessionStatus::Pending,
        offer: None,
        answer: None,
        ice_candidates: Vec::new(),
        started_at: now,
        ended_at: None,
        last_activity_at: now,
        bytes_transferred: 0,
    };
    state.sessions.create(&session).await?;

    let connect_command = DeviceCommand {
        id: Uuid::new_v4(),
        device_id: device.id,
        org_id: device.org_id,
        kind: CommandType::RemoteConnectWs,
        payload: serde_json::json!({ "sessionId": session.id }),
        status: CommandStatus::Pending,
        exit_code: None,
        stdout: None,
        stderr: None,
        issued_by: ctx.actor.id,
        issued_at: now,
        started_at: None,
        completed_at: None,
        expires_at: now + chrono::Duration::minutes(2),
    };
    state.commands.enqueue(&connect_command).await?;

    audit_user_action(&state, &ctx, Some(device.org_id), "remote_session.created", "remote_session", Some(session.id), AuditResult::Success, serde_json::json!({ "deviceId": device.id })).await;
    Ok(Json(session))
}

pub async fn get(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(session_id): Path<Uuid>) -> HandlerResult<Json<RemoteSession>> {
    let session = state.sessions.get(session_id).await.map_err(|_| ApiError::not_found("remote_session"))?;
    require_org_access(&ctx, session.org_id, "remote_session")?;
    Ok(Json(session))
}

/// Loads the session and defers to `authorize_signal` for the ownership
/// check, rather than reimplementing it here — `Caller::User` only ever
/// passes for the session's own `userId`, regardless of `message`.
async fn load_owned(state: &AppState, ctx: &AuthContext, session_id: Uuid, message: &SignalingMessage) -> Result<RemoteSession, ApiError> {
    let session = state.sessions.get(session_id).await.map_err(|_| ApiError::not_found("remote_session"))?;
    authorize_signal(&session, Caller::User(ctx.actor.id), message).map_err(|_| ApiError::not_found("remote_session"))?;
    Ok(session)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OfferRequest {
    pub sdp: String,
}

pub async fn offer(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(session_id): Path<Uuid>, Json(req): Json<OfferRequest>) -> HandlerResult<Json<serde_json::Value>> {
    let session = load_owned(&state, &ctx, session_id, &SignalingMessage::Offer { sdp: req.sdp.clone() }).await?;
    state.sessions.apply_signal(session.id, Some(&req.sdp), None, None, Utc::now()).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnswerRequest {
    pub sdp: String,
}

pub async fn answer(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(session_id): Path<Uuid>, Json(req): Json<AnswerRequest>) -> HandlerResult<Json<serde_json::Value>> {
    let session = load_owned(&state, &ctx, session_id, &SignalingMessage::Answer { sdp: req.sdp.clone() }).await?;
    state.sessions.apply_signal(session.id, None, Some(&req.sdp), None, Utc::now()).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn ice(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(session_id): Path<Uuid>, Json(candidate): Json<IceCandidate>) -> HandlerResult<Json<serde_json::Value>> {
    let session = load_owned(&state, &ctx, session_id, &SignalingMessage::Ice { candidate: candidate.clone() }).await?;
    state.sessions.apply_signal(session.id, None, None, Some(&candidate), Utc::now()).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn end(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(session_id): Path<Uuid>) -> HandlerResult<Json<serde_json::Value>> {
    let session = load_owned(&state, &ctx, session_id, &SignalingMessage::End).await?;
    state.sessions.end(session.id, RemoteSessionStatus::Disconnected, Utc::now()).await?;

    audit_user_action(&state, &ctx, Some(session.org_id), "remote_session.ended", "remote_session", Some(session.id), AuditResult::Success, serde_json::json!({})).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartTransferRequest {
    pub session_id: Option<Uuid>,
    pub device_id: Uuid,
    pub direction: TransferDirection,
    pub remote_path: String,
    pub size: u64,
}

pub async fn download(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<StartTransferRequest>) -> HandlerResult<Json<FileTransfer>> {
    require_permission(&ctx, "remote_session", "write")?;
    let device = state.devices.get_by_id(req.device_id).await.map_err(|_| ApiError::not_found("device"))?;
    require_org_access(&ctx, device.org_id, "device")?;

    let transfer = FileTransfer {
        id: Uuid::new_v4(),
        session_id: req.session_id,
        device_id: device.id,
        user_id: ctx.actor.id,
        direction: req.direction,
        remote_path: req.remote_path,
        size: req.size,
        status: TransferStatus::Pending,
        progress_percent: 0,
    };
    state.sessions.create_file_transfer(&transfer).await?;

    audit_user_action(&state, &ctx, Some(device.org_id), "file_transfer.started", "file_transfer", Some(transfer.id), AuditResult::Success, serde_json::json!({ "remotePath": transfer.remote_path })).await;
    Ok(Json(transfer))
}

pub async fn cancel_transfer(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(transfer_id): Path<Uuid>) -> HandlerResult<Json<serde_json::Value>> {
    let transfer = state.sessions.get_file_transfer(transfer_id).await.map_err(|_| ApiError::not_found("file_transfer"))?;
    if transfer.user_id != ctx.actor.id {
        return Err(ApiError::not_found("file_transfer").into());
    }

    state.sessions.update_transfer_progress(transfer_id, transfer.progress_percent, TransferStatus::Cancelled).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProgressRequest {
    pub bytes_transferred: u64,
}

/// Accepts either the owning user's bearer token or the transfer's own
/// device's agent bearer token; everyone else gets the same 404 a missing
/// transfer would, so probing for the existence of someone else's transfer
/// doesn't leak anything.
pub async fn progress(State(state): State<AppState>, parts: Parts, Path(transfer_id): Path<Uuid>, Json(req): Json<ProgressRequest>) -> HandlerResult<Json<serde_json::Value>> {
    let transfer = state.sessions.get_file_transfer(transfer_id).await.map_err(|_| ApiError::not_found("file_transfer"))?;

    let token = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".into()))?;

    let authorized = match resolve_auth_context(&state, token).await {
        Ok(ctx) => transfer.user_id == ctx.actor.id,
        Err(_) => {
            let device = state.devices.get_by_id(transfer.device_id).await.map_err(|_| ApiError::not_found("file_transfer"))?;
            tokens::sha256_hex(token) == device.agent_token_hash
        }
    };
    if !authorized {
        return Err(ApiError::not_found("file_transfer").into());
    }

    let percent = if transfer.size == 0 {
        100
    } else {
        ((req.bytes_transferred.min(transfer.size) * 100) / transfer.size) as u8
    };
    let status = if percent >= 100 { TransferStatus::Completed } else { TransferStatus::InProgress };
    state.sessions.update_transfer_progress(transfer_id, percent, status).await?;

    if let Some(session_id) = transfer.session_id {
        state.sessions.record_progress(session_id, req.bytes_transferred, Utc::now()).await?;
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}
