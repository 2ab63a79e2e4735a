//! Pure tenancy and credential logic shared between the HTTP layer and the
//! background workers: scope resolution, permission checks, password/TOTP
//! primitives. No network or store access — `breeze-infra-db` and
//! `apps/control-plane` supply the live data this crate operates on.

pub mod authorize;
pub mod encryption;
pub mod jwt;
pub mod password;
pub mod scope;
pub mod tokens;
pub mod totp;

pub use authorize::{org_filter, require_org_access, require_permission, require_scope, OrgFilter};
pub use jwt::JwtError;
pub use scope::{derive_accessible_org_ids, system_scope_create_requires_partner, ScopeInputs};
