//! REST and WebSocket handlers, one module per domain area from the
//! component design. Each handler follows the same pipeline: extract
//! (typed body + `AuthedUser`), authorize (scope/permission/org-access),
//! call the repository, audit, shape the response.

pub mod agents;
pub mod alerts;
pub mod audit;
pub mod auth;
pub mod devices;
pub mod remote;
pub mod webhooks;
pub mod ws;

use breeze_domain_models::audit::{ActorType, AuditResult};
use breeze_domain_models::tenancy::{ActorKind, AuthContext};
use uuid::Uuid;

use crate::middleware::ApiErrorResponse;
use crate::state::AppState;

pub type HandlerResult<T> = Result<T, ApiErrorResponse>;

fn actor_type_of(kind: ActorKind) -> ActorType {
    match kind {
        ActorKind::User => ActorType::User,
        ActorKind::ApiKey => ActorType::ApiKey,
        ActorKind::Agent => ActorType::Agent,
        ActorKind::System => ActorType::System,
    }
}

/// Appends one entry to the audit chain. Failures to audit are logged but
/// never fail the request that triggered them — the mutation already
/// happened, and rolling it back because the audit write failed would trade
/// one inconsistency for a worse one.
#[allow(clippy::too_many_arguments)]
pub async fn record_audit(
    state: &AppState,
    org_id: Option<Uuid>,
    actor_type: ActorType,
    actor_id: Uuid,
    actor_email: Option<String>,
    action: &str,
    resource_type: &str,
    resource_id: Option<Uuid>,
    result: AuditResult,
    details: serde_json::Value,
) {
    let previous = match state.audit.last_checksum().await {
        Ok(checksum) => checksum,
        Err(e) => {
            tracing::warn!("could not read previous audit checksum: {e}");
            return;
        }
    };
    let entry = breeze_shared_telemetry::audit::build_entry(
        breeze_shared_telemetry::audit::NewAuditEntry {
            org_id,
            actor_type,
            actor_id,
            actor_email,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id,
            resource_name: None,
            details,
            ip: None,
            user_agent: None,
            result,
        },
        &previous,
        chrono::Utc::now(),
    );
    if let Err(e) = state.audit.append(&entry).await {
        tracing::warn!("failed to append audit entry for {action}: {e}");
    }
}

pub async fn audit_user_action(
    state: &AppState,
    ctx: &AuthContext,
    org_id: Option<Uuid>,
    action: &str,
    resource_type: &str,
    resource_id: Option<Uuid>,
    result: AuditResult,
    details: serde_json::Value,
) {
    record_audit(
        state,
        org_id,
        actor_type_of(ctx.actor.kind),
        ctx.actor.id,
        ctx.actor.email.clone(),
        action,
        resource_type,
        resource_id,
        result,
        details,
    )
    .await;
}
