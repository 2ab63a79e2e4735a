//! Persistence layer. This is the only crate besides `breeze-infra-cache`,
//! `breeze-infra-queue`, and `breeze-infra-storage` that is allowed to
//! perform I/O; everything in `libs/domain/*` stays pure.

pub mod client;
pub mod errors;
pub mod repositories;
pub mod schema;
mod rowext;

pub use client::DbClient;
pub use errors::DbError;
pub use repositories::{
    AlertRepository, AuditRepository, CommandRepository, DeviceRepository, FanoutRepository,
    IdentityRepository, JobRepository, SessionRepository, TenancyRepository, WebhookRepository,
};
