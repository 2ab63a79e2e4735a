//! Authorization helpers consumed uniformly by every domain handler.

use breeze_domain_models::error::ApiError;
use breeze_domain_models::tenancy::{AuthContext, Scope};
use uuid::Uuid;

pub fn require_scope(ctx: &AuthContext, allowed: &[Scope]) -> Result<(), ApiError> {
    if allowed.contains(&ctx.scope) {
        Ok(())
    } else {
        Err(ApiError::forbidden("insufficient scope"))
    }
}

pub fn require_permission(ctx: &AuthContext, resource: &str, action: &str) -> Result<(), ApiError> {
    if ctx.has_permission(resource, action) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "missing permission {resource}:{action}"
        )))
    }
}

/// `NotFound`, never `Forbidden` — a caller outside the accessible org set
/// must not be able to distinguish "doesn't exist" from "not yours".
pub fn require_org_access(ctx: &AuthContext, org_id: Uuid, resource_kind: &str) -> Result<(), ApiError> {
    if ctx.can_access_org(org_id) {
        Ok(())
    } else {
        Err(ApiError::not_found(resource_kind))
    }
}

/// SQL predicate fragment equivalent: an empty `Vec` means "always false",
/// `None` on the inner option means "always true". Repository code turns
/// this into an actual `WHERE` clause; this function only computes which
/// case applies so the decision lives in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgFilter {
    AlwaysTrue,
    AlwaysFalse,
    In(Vec<Uuid>),
}

pub fn org_filter(ctx: &AuthContext) -> OrgFilter {
    match &ctx.accessible_org_ids.0 {
        None => OrgFilter::AlwaysTrue,
        Some(ids) if ids.is_empty() => OrgFilter::AlwaysFalse,
        Some(ids) => OrgFilter::In(ids.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breeze_domain_models::tenancy::{AccessibleOrgIds, Actor, ActorKind};

    fn ctx_with(accessible: AccessibleOrgIds) -> AuthContext {
        AuthContext {
            actor: Actor {
                kind: ActorKind::User,
                id: Uuid::new_v4(),
                email: None,
            },
            session_id: Uuid::new_v4(),
            scope: Scope::Partner,
            partner_id: Some(Uuid::new_v4()),
            org_id: None,
            role_id: Uuid::new_v4(),
            permissions: vec![],
            accessible_org_ids: accessible,
        }
    }

    #[test]
    fn org_filter_matches_accessible_org_ids_cases() {
        assert_eq!(org_filter(&ctx_with(AccessibleOrgIds::all())), OrgFilter::AlwaysTrue);
        assert_eq!(org_filter(&ctx_with(AccessibleOrgIds::none())), OrgFilter::AlwaysFalse);
        let org = Uuid::new_v4();
        assert_eq!(
            org_filter(&ctx_with(AccessibleOrgIds::only(org))),
            OrgFilter::In(vec![org])
        );
    }

    #[test]
    fn require_org_access_returns_not_found_not_forbidden() {
        let ctx = ctx_with(AccessibleOrgIds::none());
        let err = require_org_access(&ctx, Uuid::new_v4(), "device").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
