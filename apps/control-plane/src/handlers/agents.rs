//! Agent-facing endpoints: enrollment, heartbeat, command-result posting,
//! and certificate renewal. None of these carry a user bearer token —
//! identity is established from an enrollment key hash or an agent bearer
//! hash compared against `device.agent_token_hash`.

use axum::extract::{Path, State};
use axum::http::{header, request::Parts};
use axum::Json;
use breeze_domain_auth::tokens;
use breeze_domain_models::audit::{ActorType, AuditResult};
use breeze_domain_models::command::CommandResultRequest;
use breeze_domain_models::device::{Device, DeviceCertificate, DeviceStatus, EnrollmentKey, HeartbeatRequest, HeartbeatResponse};
use breeze_domain_models::error::ApiError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::ApiErrorResponse;
use crate::state::AppState;

use super::{record_audit, HandlerResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnrollRequest {
    pub enrollment_key: String,
    pub hardware_fingerprint: Option<String>,
    pub hostname: String,
    pub display_name: String,
    pub os_type: breeze_domain_models::device::OsType,
    pub os_version: String,
    pub architecture: String,
    pub agent_version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub agent_id: String,
    pub auth_token: String,
    pub org_id: Uuid,
    pub site_id: Uuid,
    pub config: serde_json::Value,
}

/// The org/site an enrolling device lands on is always determined by the
/// key's own binding — there is no "pick your org" step, since an agent
/// with a leaked key must not be able to enroll into an arbitrary tenant.
pub async fn enroll(State(state): State<AppState>, Json(req): Json<EnrollRequest>) -> HandlerResult<Json<EnrollResponse>> {
    let key_hash = breeze_domain_auth::password::peppered_hash(&state.config.enrollment_key_pepper, &req.enrollment_key);
    let key = state
        .devices
        .get_enrollment_key_by_hash(&key_hash)
        .await
        .map_err(|_| ApiError::forbidden("invalid enrollment key"))?;

    if !key.is_usable(Utc::now()) {
        return Err(ApiError::forbidden("enrollment key is expired, revoked, or exhausted").into());
    }
    state.devices.consume_enrollment_key(key.id).await.map_err(|_| ApiError::forbidden("enrollment key is exhausted"))?;

    let agent_id = tokens::generate_agent_id();
    let auth_token = tokens::generate_bearer_token();
    let device = Device {
        id: Uuid::new_v4(),
        org_id: key.org_id,
        site_id: key.site_id,
        agent_id: agent_id.clone(),
        hostname: req.hostname,
        display_name: req.display_name,
        os_type: req.os_type,
        os_version: req.os_version,
        architecture: req.architecture,
        agent_version: req.agent_version,
        status: DeviceStatus::Online,
        agent_token_hash: tokens::sha256_hex(&auth_token),
        last_seen_at: Some(Utc::now()),
        enrolled_at: Utc::now(),
        tags: Vec::new(),
        certificate: None,
        deleted_at: None,
    };
    state.devices.enroll(&device).await?;

    record_audit(
        &state,
        Some(key.org_id),
        ActorType::Agent,
        device.id,
        None,
        "device.enrolled",
        "device",
        Some(device.id),
        AuditResult::Success,
        serde_json::json!({ "hostname": device.hostname, "hardwareFingerprint": req.hardware_fingerprint }),
    )
    .await;

    Ok(Json(EnrollResponse {
        agent_id,
        auth_token,
        org_id: device.org_id,
        site_id: device.site_id,
        config: serde_json::json!({ "heartbeatIntervalSeconds": state.config.heartbeat_interval.num_seconds() }),
    }))
}

pub(crate) async fn authenticate_agent(state: &AppState, agent_id: &str, auth_token: &str) -> Result<Device, ApiError> {
    let device = state.devices.get_by_agent_id(agent_id).await.map_err(|_| ApiError::Unauthenticated("unknown agent".into()))?;
    if tokens::sha256_hex(auth_token) != device.agent_token_hash {
        return Err(ApiError::Unauthenticated("invalid agent token".into()));
    }
    Ok(device)
}

pub(crate) fn mtls_serial_header(parts: &Parts) -> Option<&str> {
    parts.headers.get("X-Client-Cert-Serial").and_then(|h| h.to_str().ok())
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    parts: Parts,
    Json(req): Json<HeartbeatRequest>,
) -> HandlerResult<Json<HeartbeatResponse>> {
    let decision = breeze_infra_cache::ratelimit::check_and_increment(&state.cache, "heartbeat", &req.agent_id, 6, 60, Utc::now().timestamp())
        .await
        .map_err(|e| ApiError::TransientStoreFailure(e.to_string()))?;
    if !decision.allowed {
        return Err(ApiError::RateLimited { retry_after_secs: 60 }.into());
    }

    let device = authenticate_agent(&state, &req.agent_id, &req.auth_token).await?;
    if device.id != device_id {
        return Err(ApiError::not_found("device").into());
    }

    if state.config.mtls_enforced {
        if let Some(cert) = &device.certificate {
            let presented = mtls_serial_header(&parts);
            if presented != Some(cert.serial.as_str()) {
                return Err(ApiError::Unauthenticated("client certificate serial mismatch".into()).into());
            }
        }
    }

    state.devices.record_heartbeat(device.id, Utc::now()).await?;
    crate::services::alert_engine::evaluate(&state, &device, &req.metrics, req.software.as_deref()).await;
    let commands = state.commands.drain_pending_for_device(device.id, Utc::now()).await?;

    let renew_cert = device
        .certificate
        .as_ref()
        .map(|cert| cert.needs_renewal(Utc::now()))
        .unwrap_or(false);

    Ok(Json(HeartbeatResponse {
        commands,
        config_update: None,
        upgrade_to: None,
        renew_cert,
    }))
}

pub async fn post_command_result(
    State(state): State<AppState>,
    Path((device_id, command_id)): Path<(Uuid, Uuid)>,
    parts: Parts,
    Json(req): Json<CommandResultRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    let token = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".into()))?;

    // `device_id` in the path only scopes the route; ownership is enforced
    // by `post_result`'s join against the agent's own bearer hash, never by
    // trusting this path segment.
    let device = state.devices.get_by_id(device_id).await.map_err(|_| ApiError::not_found("command"))?;
    if tokens::sha256_hex(token) != device.agent_token_hash {
        return Err(ApiError::not_found("command").into());
    }

    let status = if req.exit_code == 0 {
        breeze_domain_models::command::CommandStatus::Completed
    } else {
        breeze_domain_models::command::CommandStatus::Failed
    };

    state
        .commands
        .post_result(
            command_id,
            &device.agent_id,
            status,
            req.exit_code,
            req.stdout.as_deref(),
            req.stderr.as_deref(),
            req.attempt,
            Utc::now(),
        )
        .await
        .map_err(|e| match e {
            breeze_infra_db::DbError::NotFound => ApiError::not_found("command"),
            other => other.into(),
        })?;

    record_audit(
        &state,
        Some(device.org_id),
        ActorType::Agent,
        device.id,
        None,
        "command.result_posted",
        "device_command",
        Some(command_id),
        if status == breeze_domain_models::command::CommandStatus::Completed { AuditResult::Success } else { AuditResult::Failure },
        serde_json::json!({ "exitCode": req.exit_code, "attempt": req.attempt }),
    )
    .await;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RenewCertRequest {
    pub agent_id: String,
}

/// Deliberately bearer-only — the WAF must exclude this route from mTLS
/// enforcement, since an expired or about-to-expire cert is exactly the
/// condition that brings an agent here.
pub async fn renew_cert(State(state): State<AppState>, parts: Parts, Json(req): Json<RenewCertRequest>) -> HandlerResult<Json<serde_json::Value>> {
    let token = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".into()))?;

    let device = authenticate_agent(&state, &req.agent_id, token).await?;

    if let Some(cert) = &device.certificate {
        if cert.is_expired(Utc::now()) {
            let org = state.tenancy.get_organization(device.org_id).await?;
            if org.expired_cert_policy == breeze_domain_models::tenancy::ExpiredCertPolicy::Quarantine {
                state.devices.set_status(device.id, &DeviceStatus::Quarantined).await?;
                record_audit(
                    &state,
                    Some(device.org_id),
                    ActorType::System,
                    device.id,
                    None,
                    "device.quarantined",
                    "device",
                    Some(device.id),
                    AuditResult::Denied,
                    serde_json::json!({ "reason": "certificate expired" }),
                )
                .await;
                return Err(ApiError::forbidden("certificate expired; device quarantined pending operator review").into());
            }
        }
    }

    let now = Utc::now();
    let new_cert = DeviceCertificate {
        serial: tokens::random_token_hex(16),
        external_cert_id: format!("local-{}", Uuid::new_v4()),
        issued_at: now,
        expires_at: now + chrono::Duration::days(90),
    };
    state.devices.update_certificate(device.id, &new_cert).await?;

    Ok(Json(serde_json::json!({ "certificate": new_cert })))
}

/// Issues a single-use (or counted) enrollment key bound to an org/site.
/// Exposed to operators via `handlers::devices`, kept here because it
/// shares the enrollment-key hashing logic with `enroll`.
pub async fn issue_enrollment_key(state: &AppState, org_id: Uuid, site_id: Uuid, max_uses: Option<u32>, ttl: Option<chrono::Duration>) -> Result<(EnrollmentKey, String), ApiErrorResponse> {
    let plain = tokens::random_token_hex(24);
    let key = EnrollmentKey {
        id: Uuid::new_v4(),
        org_id,
        site_id,
        key_hash: breeze_domain_auth::password::peppered_hash(&state.config.enrollment_key_pepper, &plain),
        max_uses,
        use_count: 0,
        expires_at: ttl.map(|d| Utc::now() + d),
        revoked_at: None,
        created_at: Utc::now(),
    };
    state.devices.create_enrollment_key(&key).await?;
    Ok((key, plain))
}
