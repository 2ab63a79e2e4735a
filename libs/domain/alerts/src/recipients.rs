//! In-app notification recipient computation.

use breeze_domain_models::tenancy::OrgAccess;
use uuid::Uuid;

/// One partner user's access configuration, as loaded from the store.
pub struct PartnerUserAccess {
    pub user_id: Uuid,
    pub org_access: OrgAccess,
    pub org_ids: Option<Vec<Uuid>>,
}

/// Computes the in-app recipient set for an alert in `alert_org_id`.
///
/// Recipients are every org-scoped user of `alert_org_id` plus every
/// partner user with `orgAccess=all`, or `orgAccess=selected` whose
/// `orgIds` contains `alert_org_id`. Partner users with `orgAccess=none`
/// are excluded even if their role carries a `*:*` wildcard permission —
/// org access is an independent gate from role permissions.
pub fn inapp_recipients(
    alert_org_id: Uuid,
    org_scoped_user_ids: &[Uuid],
    partner_users: &[PartnerUserAccess],
) -> Vec<Uuid> {
    let mut recipients: Vec<Uuid> = org_scoped_user_ids.to_vec();
    for pu in partner_users {
        let included = match pu.org_access {
            OrgAccess::All => true,
            OrgAccess::Selected => pu
                .org_ids
                .as_ref()
                .map(|ids| ids.contains(&alert_org_id))
                .unwrap_or(false),
            OrgAccess::None => false,
        };
        if included {
            recipients.push(pu.user_id);
        }
    }
    recipients
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_scoped_users_are_always_included() {
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();
        let recipients = inapp_recipients(org, &[user], &[]);
        assert_eq!(recipients, vec![user]);
    }

    #[test]
    fn partner_user_with_all_access_is_included() {
        let org = Uuid::new_v4();
        let partner_user_id = Uuid::new_v4();
        let recipients = inapp_recipients(
            org,
            &[],
            &[PartnerUserAccess {
                user_id: partner_user_id,
                org_access: OrgAccess::All,
                org_ids: None,
            }],
        );
        assert_eq!(recipients, vec![partner_user_id]);
    }

    #[test]
    fn partner_user_selected_access_requires_matching_org_id() {
        let org = Uuid::new_v4();
        let other_org = Uuid::new_v4();
        let matching = Uuid::new_v4();
        let not_matching = Uuid::new_v4();
        let recipients = inapp_recipients(
            org,
            &[],
            &[
                PartnerUserAccess {
                    user_id: matching,
                    org_access: OrgAccess::Selected,
                    org_ids: Some(vec![org]),
                },
                PartnerUserAccess {
                    user_id: not_matching,
                    org_access: OrgAccess::Selected,
                    org_ids: Some(vec![other_org]),
                },
            ],
        );
        assert_eq!(recipients, vec![matching]);
    }

    #[test]
    fn partner_user_with_none_access_is_never_included() {
        let org = Uuid::new_v4();
        let recipients = inapp_recipients(
            org,
            &[],
            &[PartnerUserAccess {
                user_id: Uuid::new_v4(),
                org_access: OrgAccess::None,
                org_ids: None,
            }],
        );
        assert!(recipients.is_empty());
    }
}
