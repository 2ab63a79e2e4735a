//! Seeds a single development tenant: a partner, one organization and
//! site under it, a system-scope admin role with every permission, an
//! admin user, and a device enrollment key — enough to log in and enroll
//! an agent against a freshly migrated database.

use breeze_domain_auth::password::hash_password;
use breeze_domain_auth::tokens;
use breeze_domain_models::device::EnrollmentKey;
use breeze_domain_models::identity::{User, UserStatus};
use breeze_domain_models::tenancy::{
    ExpiredCertPolicy, Organization, OrganizationStatus, Partner, PartnerStatus, PartnerType,
    Permission, Role, Scope, Site,
};
use breeze_infra_db::{DbClient, DeviceRepository, IdentityRepository, TenancyRepository};
use chrono::Utc;
use dotenvy::dotenv;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("info").with_target(false).init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let database_token = std::env::var("TURSO_AUTH_TOKEN").ok();
    let enrollment_key_pepper = std::env::var("ENROLLMENT_KEY_PEPPER").expect("ENROLLMENT_KEY_PEPPER must be set");
    let bcrypt_cost: u32 = std::env::var("BCRYPT_COST").ok().and_then(|v| v.parse().ok()).unwrap_or(12);
    let admin_email = std::env::var("SEED_ADMIN_EMAIL").unwrap_or_else(|_| "admin@breeze.dev".to_string());
    let admin_password = std::env::var("SEED_ADMIN_PASSWORD").unwrap_or_else(|_| "change-me-immediately".to_string());

    let db = DbClient::connect(&database_url, database_token).await?;
    let tenancy = TenancyRepository::new(db.clone());
    let identity = IdentityRepository::new(db.clone());
    let devices = DeviceRepository::new(db.clone());

    let now = Utc::now();

    info!("seeding partner");
    let partner = Partner {
        id: Uuid::new_v4(),
        name: "Breeze Internal".to_string(),
        slug: "breeze-internal".to_string(),
        kind: PartnerType::Internal,
        plan: "enterprise".to_string(),
        max_organizations: None,
        max_devices: None,
        settings: serde_json::json!({}),
        status: PartnerStatus::Active,
        created_at: now,
        deleted_at: None,
    };
    tenancy.create_partner(&partner).await?;

    info!("seeding organization and site");
    let org = Organization {
        id: Uuid::new_v4(),
        partner_id: partner.id,
        name: "Breeze Demo Org".to_string(),
        slug: "breeze-demo".to_string(),
        status: OrganizationStatus::Active,
        max_devices: None,
        contract_start: Some(now),
        contract_end: None,
        expired_cert_policy: ExpiredCertPolicy::Quarantine,
        created_at: now,
        deleted_at: None,
    };
    tenancy.create_organization(&org).await?;

    let site = Site {
        id: Uuid::new_v4(),
        org_id: org.id,
        name: "Headquarters".to_string(),
        timezone: "UTC".to_string(),
        address: None,
        contact: None,
        created_at: now,
        deleted_at: None,
    };
    tenancy.create_site(&site).await?;

    info!("seeding system admin role");
    let role = Role {
        id: Uuid::new_v4(),
        partner_id: None,
        org_id: None,
        scope: Scope::System,
        name: "System Administrator".to_string(),
        is_system: true,
        permissions: vec![Permission::new("*", "*")],
    };
    tenancy.create_role(&role).await?;

    info!(email = %admin_email, "seeding admin user");
    let admin = User {
        id: Uuid::new_v4(),
        email: admin_email.clone(),
        name: "Breeze Admin".to_string(),
        password_hash: Some(hash_password(&admin_password, bcrypt_cost)?),
        mfa_secret_encrypted: None,
        mfa_enabled: false,
        status: UserStatus::Active,
        last_login_at: None,
        password_changed_at: Some(now),
        created_at: now,
        deleted_at: None,
    };
    identity.create_user(&admin).await?;
    identity.add_organization_member(org.id, admin.id, role.id).await?;

    info!("seeding device enrollment key");
    let plain_key = tokens::random_token_hex(24);
    let enrollment_key = EnrollmentKey {
        id: Uuid::new_v4(),
        org_id: org.id,
        site_id: site.id,
        key_hash: breeze_domain_auth::password::peppered_hash(&enrollment_key_pepper, &plain_key),
        max_uses: Some(50),
        use_count: 0,
        expires_at: Some(now + chrono::Duration::days(30)),
        revoked_at: None,
        created_at: now,
    };
    devices.create_enrollment_key(&enrollment_key).await?;

    info!(admin_email = %admin_email, enrollment_key = %plain_key, "seed complete");
    Ok(())
}
