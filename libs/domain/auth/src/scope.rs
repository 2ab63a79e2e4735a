//! `accessibleOrgIds` derivation. Pure function over live membership rows —
//! the caller is responsible for loading fresh rows on every request; this
//! module never caches or accepts stale input.

use breeze_domain_models::tenancy::{AccessibleOrgIds, OrgAccess, Scope};
use uuid::Uuid;

/// Everything needed to derive `accessibleOrgIds` for one request, already
/// loaded from the store. `partner_org_ids` is every non-deleted org under
/// the actor's partner; `user_org_ids` is the partner user's `orgIds` column.
pub struct ScopeInputs<'a> {
    pub scope: Scope,
    pub org_id: Option<Uuid>,
    pub partner_org_access: Option<OrgAccess>,
    pub partner_org_ids: &'a [Uuid],
    pub user_org_ids: Option<&'a [Uuid]>,
}

pub fn derive_accessible_org_ids(inputs: &ScopeInputs<'_>) -> AccessibleOrgIds {
    match inputs.scope {
        Scope::System => AccessibleOrgIds::all(),
        Scope::Organization => match inputs.org_id {
            Some(org_id) => AccessibleOrgIds::only(org_id),
            None => AccessibleOrgIds::none(),
        },
        Scope::Partner => match inputs.partner_org_access {
            Some(OrgAccess::All) => AccessibleOrgIds::selected(inputs.partner_org_ids.to_vec()),
            Some(OrgAccess::Selected) => {
                let selected: Vec<Uuid> = inputs
                    .user_org_ids
                    .unwrap_or(&[])
                    .iter()
                    .filter(|id| inputs.partner_org_ids.contains(id))
                    .copied()
                    .collect();
                AccessibleOrgIds::selected(selected)
            }
            Some(OrgAccess::None) | None => AccessibleOrgIds::none(),
        },
    }
}

/// Resolution for the open question on system-scope org lifecycle mutations:
/// create requires an explicit partner target; update/delete may operate
/// against the resource's own `partnerId` without one.
pub fn system_scope_create_requires_partner(scope: Scope, partner_id_in_request: Option<Uuid>) -> bool {
    scope != Scope::System || partner_id_in_request.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_scope_sees_everything() {
        let inputs = ScopeInputs {
            scope: Scope::System,
            org_id: None,
            partner_org_access: None,
            partner_org_ids: &[],
            user_org_ids: None,
        };
        assert_eq!(derive_accessible_org_ids(&inputs), AccessibleOrgIds::all());
    }

    #[test]
    fn organization_scope_sees_only_its_own_org() {
        let org = Uuid::new_v4();
        let inputs = ScopeInputs {
            scope: Scope::Organization,
            org_id: Some(org),
            partner_org_access: None,
            partner_org_ids: &[],
            user_org_ids: None,
        };
        assert_eq!(derive_accessible_org_ids(&inputs), AccessibleOrgIds::only(org));
    }

    #[test]
    fn partner_all_access_sees_every_partner_org_loaded_live() {
        let (o1, o2) = (Uuid::new_v4(), Uuid::new_v4());
        let partner_orgs = vec![o1, o2];
        let inputs = ScopeInputs {
            scope: Scope::Partner,
            org_id: None,
            partner_org_access: Some(OrgAccess::All),
            partner_org_ids: &partner_orgs,
            user_org_ids: None,
        };
        assert_eq!(
            derive_accessible_org_ids(&inputs),
            AccessibleOrgIds::selected(partner_orgs)
        );
    }

    #[test]
    fn partner_selected_access_intersects_with_partner_orgs() {
        let (o1, o2, o3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let partner_orgs = vec![o1, o2];
        let user_orgs = vec![o1, o3];
        let inputs = ScopeInputs {
            scope: Scope::Partner,
            org_id: None,
            partner_org_access: Some(OrgAccess::Selected),
            partner_org_ids: &partner_orgs,
            user_org_ids: Some(&user_orgs),
        };
        assert_eq!(derive_accessible_org_ids(&inputs), AccessibleOrgIds::selected(vec![o1]));
    }

    #[test]
    fn partner_none_access_sees_nothing() {
        let inputs = ScopeInputs {
            scope: Scope::Partner,
            org_id: None,
            partner_org_access: Some(OrgAccess::None),
            partner_org_ids: &[Uuid::new_v4()],
            user_org_ids: None,
        };
        assert!(derive_accessible_org_ids(&inputs).is_empty_set());
    }

    #[test]
    fn system_create_requires_explicit_partner() {
        assert!(!system_scope_create_requires_partner(Scope::System, None));
        assert!(system_scope_create_requires_partner(Scope::System, Some(Uuid::new_v4())));
        assert!(system_scope_create_requires_partner(Scope::Partner, None));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// A fixed pool of org ids big enough for `prop::collection::vec` to
    /// produce overlapping and non-overlapping partner/user subsets without
    /// needing an `Arbitrary` impl for `Uuid` itself.
    fn org_pool() -> [Uuid; 6] {
        [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()]
    }

    proptest! {
        /// Partner-scoped `Selected` access must never surface an org the
        /// partner doesn't hold or the user wasn't explicitly granted —
        /// the intersection, never the union.
        #[test]
        fn partner_selected_access_is_the_intersection(
            partner_idx in prop::collection::vec(0usize..6, 0..6),
            user_idx in prop::collection::vec(0usize..6, 0..6),
        ) {
            let pool = org_pool();
            let partner_orgs: Vec<Uuid> = partner_idx.iter().map(|&i| pool[i]).collect();
            let user_orgs: Vec<Uuid> = user_idx.iter().map(|&i| pool[i]).collect();
            let inputs = ScopeInputs {
                scope: Scope::Partner,
                org_id: None,
                partner_org_access: Some(OrgAccess::Selected),
                partner_org_ids: &partner_orgs,
                user_org_ids: Some(&user_orgs),
            };
            let result = derive_accessible_org_ids(&inputs);

            for &id in &pool {
                let expected = partner_orgs.contains(&id) && user_orgs.contains(&id);
                prop_assert_eq!(result.contains(id), expected);
            }
        }

        /// `OrgAccess::All` always yields exactly the partner's own org set,
        /// independent of whatever the user's `orgIds` column contains.
        #[test]
        fn partner_all_access_ignores_user_org_ids(
            partner_idx in prop::collection::vec(0usize..6, 0..6),
            user_idx in prop::collection::vec(0usize..6, 0..6),
        ) {
            let pool = org_pool();
            let partner_orgs: Vec<Uuid> = partner_idx.iter().map(|&i| pool[i]).collect();
            let user_orgs: Vec<Uuid> = user_idx.iter().map(|&i| pool[i]).collect();
            let inputs = ScopeInputs {
                scope: Scope::Partner,
                org_id: None,
                partner_org_access: Some(OrgAccess::All),
                partner_org_ids: &partner_orgs,
                user_org_ids: Some(&user_orgs),
            };
            let result = derive_accessible_org_ids(&inputs);

            for &id in &pool {
                prop_assert_eq!(result.contains(id), partner_orgs.contains(&id));
            }
        }
    }
}
