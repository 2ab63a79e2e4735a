//! Read-only access to the append-only audit chain, plus a system-scope
//! tamper check that recomputes the checksum chain end to end.

use axum::extract::{Path, Query, State};
use axum::Json;
use breeze_domain_auth::authorize::{require_org_access, require_permission, require_scope};
use breeze_domain_models::audit::AuditLogEntry;
use breeze_domain_models::error::ApiError;
use breeze_domain_models::tenancy::Scope;
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::AuthedUser;
use crate::state::AppState;

use super::HandlerResult;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_for_org(
    State(state): State<AppState>,
    AuthedUser(ctx): AuthedUser,
    Path(org_id): Path<Uuid>,
    Query(q): Query<ListQuery>,
) -> HandlerResult<Json<Vec<AuditLogEntry>>> {
    require_permission(&ctx, "audit_log", "read")?;
    require_org_access(&ctx, org_id, "organization")?;
    Ok(Json(state.audit.list_for_org(org_id, q.limit.clamp(1, 1000)).await?))
}

/// Same filter as `list_for_org`, without the page-sized default limit —
/// for bulk retrieval rather than an interactive view.
pub async fn export(State(state): State<AppState>, AuthedUser(ctx): AuthedUser, Path(org_id): Path<Uuid>) -> HandlerResult<Json<Vec<AuditLogEntry>>> {
    require_permission(&ctx, "audit_log", "read")?;
    require_org_access(&ctx, org_id, "organization")?;
    Ok(Json(state.audit.list_for_org(org_id, 100_000).await?))
}

/// System-scope only: this walks the entire chain, not just one org's
/// slice of it, so it isn't something a partner admin should be able to
/// trigger on demand.
pub async fn verify_chain(State(state): State<AppState>, AuthedUser(ctx): AuthedUser) -> HandlerResult<Json<serde_json::Value>> {
    require_scope(&ctx, &[Scope::System])?;
    require_permission(&ctx, "audit_log", "admin")?;

    match state.audit.verify_chain().await? {
        None => Ok(Json(serde_json::json!({ "intact": true }))),
        Some(tampered_at) => Err(ApiError::Fatal(format!("audit chain tampered at entry {tampered_at}")).into()),
    }
}
