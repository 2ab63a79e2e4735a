//! Login, token refresh, logout, and TOTP MFA lifecycle. Every issued
//! access token is re-derivable from live membership rows, and MFA setup
//! never enables itself — `enable` requires proof of possession via a
//! verified code first.

use axum::extract::State;
use axum::Json;
use breeze_domain_auth::{encryption, jwt, password, tokens, totp};
use breeze_domain_models::audit::AuditResult;
use breeze_domain_models::error::ApiError;
use breeze_domain_models::identity::{Session, TokenClaims, User};
use breeze_domain_models::tenancy::Scope;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::{resolve_auth_context, AuthedUser};
use crate::state::AppState;

use super::{record_audit, HandlerResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub mfa_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

async fn mint_token_pair(state: &AppState, user_id: Uuid, scope: Scope, partner_id: Option<Uuid>, org_id: Option<Uuid>, role_id: Uuid) -> Result<TokenPair, ApiError> {
    let now = Utc::now();
    let session_id = Uuid::new_v4();

    let access_claims = TokenClaims {
        sub: user_id,
        sid: session_id,
        scope,
        role_id,
        partner_id,
        org_id,
        exp: (now + state.config.access_token_ttl).timestamp(),
    };
    let access_token = jwt::sign(&access_claims, &state.config.jwt_secret).map_err(|e| ApiError::Fatal(e.to_string()))?;

    let refresh_plain = tokens::random_token_hex(32);
    let refresh_expires_at = now + state.config.refresh_token_ttl;
    state
        .identity
        .create_session(&Session {
            id: session_id,
            user_id,
            token_hash: tokens::sha256_hex(&refresh_plain),
            expires_at: refresh_expires_at,
            ip: None,
            user_agent: None,
            created_at: now,
        })
        .await?;

    Ok(TokenPair {
        access_token,
        refresh_token: refresh_plain,
        expires_in: state.config.access_token_ttl.num_seconds(),
    })
}

/// `resolve_user_membership` is the one place login/refresh consult to
/// decide which scope a user authenticates at; everywhere else re-derives
/// `accessibleOrgIds` from it instead of trusting token claims.
async fn membership_or_unauthenticated(state: &AppState, user_id: Uuid) -> Result<(Scope, Option<Uuid>, Option<Uuid>, Uuid), ApiError> {
    state
        .tenancy
        .resolve_user_membership(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("user has no tenancy membership".into()))
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> HandlerResult<Json<TokenPair>> {
    let decision = breeze_infra_cache::ratelimit::check_and_increment(&state.cache, "login", &req.email.to_lowercase(), 10, 60, Utc::now().timestamp())
        .await
        .map_err(|e| ApiError::TransientStoreFailure(e.to_string()))?;
    if !decision.allowed {
        return Err(ApiError::RateLimited { retry_after_secs: 60 }.into());
    }

    let user = match state.identity.get_user_by_email(&req.email).await {
        Ok(user) => user,
        Err(_) => return Err(ApiError::Unauthenticated("invalid email or password".into()).into()),
    };

    let hash = user.password_hash.as_deref().ok_or_else(|| ApiError::Unauthenticated("invalid email or password".into()))?;
    if !password::verify_password(&req.password, hash) {
        record_audit_login_failure(&state, &user, "auth.login").await;
        return Err(ApiError::Unauthenticated("invalid email or password".into()).into());
    }

    if user.mfa_enabled {
        let code = req.mfa_code.as_deref().ok_or_else(|| ApiError::Validation {
            message: "mfa code required".into(),
            details: vec![],
        })?;
        let encrypted = user.mfa_secret_encrypted.as_deref().ok_or_else(|| ApiError::Fatal("mfa enabled with no secret".into()))?;
        let secret_b32 = encryption::decrypt(&state.config.mfa_encryption_key, encrypted).map_err(|e| ApiError::Fatal(e.to_string()))?;
        let secret = totp::decode_secret_base32(&secret_b32).ok_or_else(|| ApiError::Fatal("stored mfa secret is not valid base32".into()))?;
        if !totp::verify_code(&secret, Utc::now().timestamp() as u64, code) {
            record_audit_login_failure(&state, &user, "auth.login").await;
            return Err(ApiError::Unauthenticated("invalid mfa code".into()).into());
        }
    }

    let (scope, partner_id, org_id, role_id) = membership_or_unauthenticated(&state, user.id).await?;
    let pair = mint_token_pair(&state, user.id, scope, partner_id, org_id, role_id).await?;
    state.identity.record_login(user.id, Utc::now()).await?;

    record_audit(
        &state,
        org_id,
        breeze_domain_models::audit::ActorType::User,
        user.id,
        Some(user.email.clone()),
        "auth.login",
        "user",
        Some(user.id),
        AuditResult::Success,
        serde_json::json!({}),
    )
    .await;

    Ok(Json(pair))
}

async fn record_audit_login_failure(state: &AppState, user: &User, action: &str) {
    record_audit(
        state,
        None,
        breeze_domain_models::audit::ActorType::User,
        user.id,
        Some(user.email.clone()),
        action,
        "user",
        Some(user.id),
        AuditResult::Failure,
        serde_json::json!({}),
    )
    .await;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Re-derives scope/role/org/partner from live rows rather than the old
/// token's claims, so a privilege reduction (demotion, org removal) takes
/// effect within one refresh cycle instead of surviving until `exp`.
pub async fn refresh(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> HandlerResult<Json<TokenPair>> {
    let token_hash = tokens::sha256_hex(&req.refresh_token);
    let session = state
        .identity
        .get_session_by_token_hash(&token_hash)
        .await
        .map_err(|_| ApiError::Unauthenticated("invalid refresh token".into()))?;

    if session.is_expired(Utc::now()) {
        state.identity.delete_session(session.id).await?;
        return Err(ApiError::Unauthenticated("refresh token has expired".into()).into());
    }

    let (scope, partner_id, org_id, role_id) = membership_or_unauthenticated(&state, session.user_id).await?;

    state.identity.delete_session(session.id).await?;
    breeze_infra_cache::revocation::revoke_session(&state.cache, session.id, session.expires_at, Utc::now())
        .await
        .map_err(|e| ApiError::TransientStoreFailure(e.to_string()))?;

    let pair = mint_token_pair(&state, session.user_id, scope, partner_id, org_id, role_id).await?;
    Ok(Json(pair))
}

pub async fn logout(State(state): State<AppState>, AuthedUser(ctx): AuthedUser) -> HandlerResult<Json<serde_json::Value>> {
    // access_token_ttl is a conservative upper bound on the token's
    // remaining lifetime from *mint* time; using it from *now* only makes
    // the marker outlive the token it revokes, never the reverse.
    breeze_infra_cache::revocation::revoke_session(&state.cache, ctx.session_id, Utc::now() + state.config.access_token_ttl, Utc::now())
        .await
        .map_err(|e| ApiError::TransientStoreFailure(e.to_string()))?;
    let _ = state.identity.delete_session(ctx.session_id).await;

    super::audit_user_action(&state, &ctx, ctx.org_id, "auth.logout", "session", None, AuditResult::Success, serde_json::json!({})).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaSetupResponse {
    pub secret: String,
    pub otpauth_url: String,
}

/// Generates a fresh TOTP seed and stores it encrypted, but leaves
/// `mfaEnabled` false — `enable` is the only operation allowed to flip it,
/// and only after a code from this exact secret verifies.
pub async fn mfa_setup(State(state): State<AppState>, AuthedUser(ctx): AuthedUser) -> HandlerResult<Json<MfaSetupResponse>> {
    let user = state.identity.get_user_by_id(ctx.actor.id).await?;
    let secret = totp::generate_secret();
    let encoded = totp::encode_secret_base32(&secret);
    let encrypted = encryption::encrypt(&state.config.mfa_encryption_key, &encoded);

    state.identity.set_mfa_secret(ctx.actor.id, Some(&encrypted), false).await?;

    Ok(Json(MfaSetupResponse {
        otpauth_url: format!("otpauth://totp/Breeze:{}?secret={encoded}&issuer=Breeze", user.email),
        secret: encoded,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MfaCodeRequest {
    pub code: String,
}

pub async fn mfa_verify(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<MfaCodeRequest>) -> HandlerResult<Json<serde_json::Value>> {
    let valid = verify_pending_mfa_code(&state, ctx.actor.id, &req.code).await?;
    Ok(Json(serde_json::json!({ "valid": valid })))
}

pub async fn mfa_enable(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Json(req): Json<MfaCodeRequest>) -> HandlerResult<Json<serde_json::Value>> {
    if !verify_pending_mfa_code(&state, ctx.actor.id, &req.code).await? {
        return Err(ApiError::Validation {
            message: "mfa code does not match the pending secret".into(),
            details: vec![],
        }
        .into());
    }

    let user = state.identity.get_user_by_id(ctx.actor.id).await?;
    let encrypted = user.mfa_secret_encrypted.ok_or_else(|| ApiError::Validation {
        message: "call mfa/setup before mfa/enable".into(),
        details: vec![],
    })?;
    state.identity.set_mfa_secret(ctx.actor.id, Some(&encrypted), true).await?;

    super::audit_user_action(&state, &ctx, ctx.org_id, "auth.mfa_enabled", "user", Some(ctx.actor.id), AuditResult::Success, serde_json::json!({})).await;
    Ok(Json(serde_json::json!({ "mfaEnabled": true })))
}

async fn verify_pending_mfa_code(state: &AppState, user_id: Uuid, code: &str) -> Result<bool, ApiError> {
    let user = state.identity.get_user_by_id(user_id).await?;
    let encrypted = user.mfa_secret_encrypted.ok_or_else(|| ApiError::Validation {
        message: "no pending mfa secret; call mfa/setup first".into(),
        details: vec![],
    })?;
    let secret_b32 = encryption::decrypt(&state.config.mfa_encryption_key, &encrypted).map_err(|e| ApiError::Fatal(e.to_string()))?;
    let secret = totp::decode_secret_base32(&secret_b32).ok_or_else(|| ApiError::Fatal("stored mfa secret is not valid base32".into()))?;
    Ok(totp::verify_code(&secret, Utc::now().timestamp() as u64, code))
}

/// Used by the WebSocket upgrade handlers, which take the bearer token as a
/// query parameter rather than an `Authorization` header.
pub async fn context_from_query_token(state: &AppState, token: &str) -> Result<breeze_domain_models::tenancy::AuthContext, ApiError> {
    resolve_auth_context(state, token).await
}
