//! Partners, organizations, sites, device groups, roles, and the membership
//! tables that feed `breeze_domain_auth::scope::derive_accessible_org_ids`.

use breeze_domain_models::tenancy::{
    DeviceGroup, OrgAccess, Organization, OrganizationStatus, Partner,
    PartnerStatus, PartnerType, Permission, Role, Scope, Site,
};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_bool, get_datetime, get_json, get_opt_datetime, get_opt_i64, get_opt_str, get_opt_uuid, get_str, get_uuid, to_json};

#[derive(Clone)]
pub struct TenancyRepository {
    db: DbClient,
}

impl TenancyRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_partner(&self, partner: &Partner) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO partners (id, name, slug, type, plan, max_organizations, max_devices, settings, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                partner.id.to_string(),
                partner.name.clone(),
                partner.slug.clone(),
                to_json(&partner.kind),
                partner.plan.clone(),
                partner.max_organizations,
                partner.max_devices,
                to_json(&partner.settings),
                to_json(&partner.status),
                partner.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_partner(&self, id: Uuid) -> Result<Partner, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT id, name, slug, type, plan, max_organizations, max_devices, settings, status, created_at FROM partners WHERE id = ?1 AND deleted_at IS NULL", params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_partner(&row)
    }

    /// Every non-deleted organization under `partner_id`, used for the
    /// `orgAccess = all` scope derivation branch.
    #[instrument(skip(self))]
    pub async fn list_organizations_for_partner(&self, partner_id: Uuid) -> Result<Vec<Organization>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, partner_id, name, slug, status, max_devices, contract_start, contract_end, expired_cert_policy, created_at
                 FROM organizations WHERE partner_id = ?1 AND deleted_at IS NULL",
                params![partner_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_organization(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn get_organization(&self, id: Uuid) -> Result<Organization, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, partner_id, name, slug, status, max_devices, contract_start, contract_end, expired_cert_policy, created_at
                 FROM organizations WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string()],
            )
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_organization(&row)
    }

    #[instrument(skip(self))]
    pub async fn create_organization(&self, org: &Organization) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO organizations (id, partner_id, name, slug, status, max_devices, contract_start, contract_end, expired_cert_policy, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                org.id.to_string(),
                org.partner_id.to_string(),
                org.name.clone(),
                org.slug.clone(),
                status_str(&org.status),
                org.max_devices,
                org.contract_start.map(|d| d.to_rfc3339()),
                org.contract_end.map(|d| d.to_rfc3339()),
                to_json(&org.expired_cert_policy),
                org.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_site(&self, site: &Site) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO sites (id, org_id, name, timezone, address, contact, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                site.id.to_string(),
                site.org_id.to_string(),
                site.name.clone(),
                site.timezone.clone(),
                site.address.clone(),
                site.contact.clone(),
                site.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_sites_for_org(&self, org_id: Uuid) -> Result<Vec<Site>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, org_id, name, timezone, address, contact, created_at FROM sites WHERE org_id = ?1 AND deleted_at IS NULL",
                params![org_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Site {
                id: get_uuid(&row, 0)?,
                org_id: get_uuid(&row, 1)?,
                name: get_str(&row, 2)?,
                timezone: get_str(&row, 3)?,
                address: get_opt_str(&row, 4)?,
                contact: get_opt_str(&row, 5)?,
                created_at: get_datetime(&row, 6)?,
                deleted_at: None,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn create_device_group(&self, group: &DeviceGroup) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO device_groups (id, org_id, site_id, name, kind, rule_expression, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                group.id.to_string(),
                group.org_id.to_string(),
                group.site_id.map(|s| s.to_string()),
                group.name.clone(),
                to_json(&group.kind),
                group.rule_expression.clone(),
                group.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_role(&self, role: &Role) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO roles (id, partner_id, org_id, scope, name, is_system, permissions) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                role.id.to_string(),
                role.partner_id.map(|p| p.to_string()),
                role.org_id.map(|o| o.to_string()),
                to_json(&role.scope),
                role.name.clone(),
                role.is_system as i64,
                to_json(&role.permissions),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_role(&self, id: Uuid) -> Result<Role, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT id, partner_id, org_id, scope, name, is_system, permissions FROM roles WHERE id = ?1", params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        Ok(Role {
            id: get_uuid(&row, 0)?,
            partner_id: get_opt_uuid(&row, 1)?,
            org_id: get_opt_uuid(&row, 2)?,
            scope: get_json::<Scope>(&row, 3)?,
            name: get_str(&row, 4)?,
            is_system: get_bool(&row, 5)?,
            permissions: get_json::<Vec<Permission>>(&row, 6)?,
        })
    }

    /// The organization ids a partner-scoped user is explicitly granted
    /// under `orgAccess = selected`.
    #[instrument(skip(self))]
    pub async fn partner_user_org_access(&self, partner_id: Uuid, user_id: Uuid) -> Result<Option<(OrgAccess, Vec<Uuid>)>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT org_access, org_ids FROM partner_users WHERE partner_id = ?1 AND user_id = ?2",
                params![partner_id.to_string(), user_id.to_string()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let access: OrgAccess = get_json(&row, 0)?;
        let org_ids: Vec<Uuid> = match get_opt_str(&row, 1)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| DbError::Mapping(e.to_string()))?,
            None => Vec::new(),
        };
        Ok(Some((access, org_ids)))
    }

    /// Every organization-scoped user that belongs to `org_id` — the
    /// reverse direction of `organization_user_org_ids`, used to compute
    /// in-app alert notification recipients.
    #[instrument(skip(self))]
    pub async fn list_org_member_user_ids(&self, org_id: Uuid) -> Result<Vec<Uuid>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT user_id FROM organization_users WHERE org_id = ?1", params![org_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(get_uuid(&row, 0)?);
        }
        Ok(out)
    }

    /// Every partner user with membership access to organizations under
    /// `partner_id`, for the in-app recipient computation to filter by
    /// `orgAccess`.
    #[instrument(skip(self))]
    pub async fn list_partner_member_access(&self, partner_id: Uuid) -> Result<Vec<(Uuid, OrgAccess, Vec<Uuid>)>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT user_id, org_access, org_ids FROM partner_users WHERE partner_id = ?1", params![partner_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let user_id = get_uuid(&row, 0)?;
            let access: OrgAccess = get_json(&row, 1)?;
            let org_ids: Vec<Uuid> = match get_opt_str(&row, 2)? {
                Some(raw) => serde_json::from_str(&raw).map_err(|e| DbError::Mapping(e.to_string()))?,
                None => Vec::new(),
            };
            out.push((user_id, access, org_ids));
        }
        Ok(out)
    }

    /// All organization ids an organization-scoped user belongs to.
    #[instrument(skip(self))]
    pub async fn organization_user_org_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT org_id FROM organization_users WHERE user_id = ?1", params![user_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(get_uuid(&row, 0)?);
        }
        Ok(out)
    }

    /// Resolves the tenancy tier a user authenticates at. Checked in order
    /// system admin, organization member, partner member — a user is
    /// expected to hold exactly one of these; the first match wins if more
    /// than one row exists. Used only at login/refresh, where the result is
    /// minted into `TokenClaims` and then re-derived from live rows again on
    /// every subsequent request.
    #[instrument(skip(self))]
    pub async fn resolve_user_membership(&self, user_id: Uuid) -> Result<Option<(Scope, Option<Uuid>, Option<Uuid>, Uuid)>, DbError> {
        let conn = self.db.conn()?;

        let mut rows = conn
            .query("SELECT role_id FROM system_admins WHERE user_id = ?1", params![user_id.to_string()])
            .await?;
        if let Some(row) = rows.next().await? {
            return Ok(Some((Scope::System, None, None, get_uuid(&row, 0)?)));
        }

        let mut rows = conn
            .query("SELECT org_id, role_id FROM organization_users WHERE user_id = ?1 LIMIT 1", params![user_id.to_string()])
            .await?;
        if let Some(row) = rows.next().await? {
            return Ok(Some((Scope::Organization, None, Some(get_uuid(&row, 0)?), get_uuid(&row, 1)?)));
        }

        let mut rows = conn
            .query("SELECT partner_id, role_id FROM partner_users WHERE user_id = ?1 LIMIT 1", params![user_id.to_string()])
            .await?;
        if let Some(row) = rows.next().await? {
            return Ok(Some((Scope::Partner, Some(get_uuid(&row, 0)?), None, get_uuid(&row, 1)?)));
        }

        Ok(None)
    }
}

fn status_str(status: &OrganizationStatus) -> String {
    serde_json::to_string(status).unwrap_or_default().trim_matches('"').to_string()
}

fn map_partner(row: &libsql::Row) -> Result<Partner, DbError> {
    Ok(Partner {
        id: get_uuid(row, 0)?,
        name: get_str(row, 1)?,
        slug: get_str(row, 2)?,
        kind: get_json::<PartnerType>(row, 3)?,
        plan: get_str(row, 4)?,
        max_organizations: get_opt_i64(row, 5)?.map(|v| v as u32),
        max_devices: get_opt_i64(row, 6)?.map(|v| v as u32),
        settings: get_json(row, 7)?,
        status: get_json::<PartnerStatus>(row, 8)?,
        created_at: get_datetime(row, 9)?,
        deleted_at: None,
    })
}

fn map_organization(row: &libsql::Row) -> Result<Organization, DbError> {
    Ok(Organization {
        id: get_uuid(row, 0)?,
        partner_id: get_uuid(row, 1)?,
        name: get_str(row, 2)?,
        slug: get_str(row, 3)?,
        status: get_json(row, 4)?,
        max_devices: get_opt_i64(row, 5)?.map(|v| v as u32),
        contract_start: get_opt_datetime(row, 6)?,
        contract_end: get_opt_datetime(row, 7)?,
        expired_cert_policy: get_json(row, 8)?,
        created_at: get_datetime(row, 9)?,
        deleted_at: None,
    })
}
