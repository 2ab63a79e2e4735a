//! Perimeter guards: liveness gating for every route, and the
//! `AuthedUser` extractor that turns a bearer access token into a live
//! `AuthContext` — verified signature, checked against the logout-marker
//! cache, and recomputed `accessibleOrgIds` from membership rows read
//! fresh on every request.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use breeze_domain_auth::jwt;
use breeze_domain_auth::scope::{derive_accessible_org_ids, ScopeInputs};
use breeze_domain_models::error::ApiError;
use breeze_domain_models::tenancy::{Actor, ActorKind, AuthContext, Scope};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

pub async fn health_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Err(reason) = state.is_operational() {
        warn!("rejecting request, control plane in maintenance: {reason}");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "maintenance", "message": reason })),
        )
            .into_response();
    }
    next.run(req).await
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".into()))
}

/// Verifies against the current signing secret, falling back to the
/// previous one so a `JWT_SECRET` rotation doesn't invalidate every token
/// issued before the deploy that changed it.
pub fn verify_with_rotation(state: &AppState, token: &str) -> Result<breeze_domain_models::identity::TokenClaims, ApiError> {
    match jwt::verify(token, &state.config.jwt_secret) {
        Ok(claims) => Ok(claims),
        Err(current_err) => match &state.config.jwt_secret_previous {
            Some(previous) => jwt::verify(token, previous)
                .map_err(|_| ApiError::Unauthenticated("invalid or expired token".into())),
            None => Err(match current_err {
                jwt::JwtError::Expired => ApiError::Unauthenticated("token has expired".into()),
                jwt::JwtError::Invalid => ApiError::Unauthenticated("invalid or expired token".into()),
            }),
        },
    }
}

/// Resolves a verified access token into a live `AuthContext`. Shared by
/// the `AuthedUser` extractor and the WebSocket handshake handlers, which
/// take the token from a query parameter instead of a header.
pub async fn resolve_auth_context(state: &AppState, token: &str) -> Result<AuthContext, ApiError> {
    let claims = verify_with_rotation(state, token)?;

    if breeze_infra_cache::revocation::is_revoked(&state.cache, claims.sid)
        .await
        .map_err(|e| ApiError::TransientStoreFailure(e.to_string()))?
    {
        return Err(ApiError::Unauthenticated("session has been revoked".into()));
    }

    let role = state.tenancy.get_role(claims.role_id).await?;

    let accessible_org_ids = match claims.scope {
        Scope::System => derive_accessible_org_ids(&ScopeInputs {
            scope: Scope::System,
            org_id: claims.org_id,
            partner_org_access: None,
            partner_org_ids: &[],
            user_org_ids: None,
        }),
        Scope::Organization => derive_accessible_org_ids(&ScopeInputs {
            scope: Scope::Organization,
            org_id: claims.org_id,
            partner_org_access: None,
            partner_org_ids: &[],
            user_org_ids: None,
        }),
        Scope::Partner => {
            let partner_id = claims
                .partner_id
                .ok_or_else(|| ApiError::Fatal("partner-scoped token missing partnerId".into()))?;
            let partner_orgs = state.tenancy.list_organizations_for_partner(partner_id).await?;
            let partner_org_ids: Vec<Uuid> = partner_orgs.iter().map(|o| o.id).collect();
            let membership = state.tenancy.partner_user_org_access(partner_id, claims.sub).await?;
            let (org_access, user_org_ids) = match &membership {
                Some((access, ids)) => (Some(*access), Some(ids.as_slice())),
                None => (None, None),
            };
            derive_accessible_org_ids(&ScopeInputs {
                scope: Scope::Partner,
                org_id: None,
                partner_org_access: org_access,
                partner_org_ids: &partner_org_ids,
                user_org_ids,
            })
        }
    };

    Ok(AuthContext {
        actor: Actor {
            kind: ActorKind::User,
            id: claims.sub,
            email: None,
        },
        session_id: claims.sid,
        scope: claims.scope,
        partner_id: claims.partner_id,
        org_id: claims.org_id,
        role_id: claims.role_id,
        permissions: role.permissions,
        accessible_org_ids,
    })
}

/// Axum extractor: `async fn handler(AuthedUser(ctx): AuthedUser, ...)`.
/// Any handler that takes this argument gets a 401 for free on a missing,
/// malformed, expired, revoked or unknown-role token.
pub struct AuthedUser(pub AuthContext);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ApiErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let ctx = resolve_auth_context(state, token).await?;
        Ok(AuthedUser(ctx))
    }
}

/// Wraps an `ApiError` so it can be returned directly from an extractor's
/// `Rejection` or a handler's `Result`; `IntoResponse` is the single place
/// that turns the taxonomy into an HTTP status and JSON body.
pub struct ApiErrorResponse(pub ApiError);

impl From<ApiError> for ApiErrorResponse {
    fn from(err: ApiError) -> Self {
        ApiErrorResponse(err)
    }
}

/// Lets handlers use `?` directly on repository calls without an
/// intermediate `.map_err(ApiError::from)`; `DbError`'s own `From` impl
/// (in `breeze-infra-db`) still does the actual taxonomy mapping.
impl From<breeze_infra_db::DbError> for ApiErrorResponse {
    fn from(err: breeze_infra_db::DbError) -> Self {
        ApiErrorResponse(err.into())
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body: breeze_domain_models::error::ErrorBody = (&self.0).into();
        (status, Json(body)).into_response()
    }
}
