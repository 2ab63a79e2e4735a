//! Composition root for every shared dependency a handler or background
//! service needs. Deliberately holds no tenant-visible data of its own —
//! devices, commands, alerts and sessions all live in `breeze-infra-db`
//! (durable) or `breeze-infra-cache` (ephemeral, TTL-bounded); a
//! process-local map here would silently diverge the moment the control
//! plane runs more than one replica.

use std::sync::{Arc, RwLock};

use breeze_infra_cache::CacheClient;
use breeze_infra_db::{
    AlertRepository, AuditRepository, CommandRepository, DbClient, DeviceRepository,
    FanoutRepository, IdentityRepository, JobRepository, SessionRepository, TenancyRepository,
    WebhookRepository,
};
use breeze_infra_storage::StorageClient;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::services::event_bus::EventBus;

/// Liveness gate consulted by `health_guard` on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMode {
    Operational,
    Maintenance(String),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbClient,
    pub cache: CacheClient,
    pub storage: StorageClient,
    pub event_bus: Arc<EventBus>,
    current_system_mode: Arc<RwLock<SystemMode>>,

    pub tenancy: Arc<TenancyRepository>,
    pub identity: Arc<IdentityRepository>,
    pub devices: Arc<DeviceRepository>,
    pub commands: Arc<CommandRepository>,
    pub alerts: Arc<AlertRepository>,
    pub webhooks: Arc<WebhookRepository>,
    pub sessions: Arc<SessionRepository>,
    pub audit: Arc<AuditRepository>,
    pub jobs: Arc<JobRepository>,
    pub fanouts: Arc<FanoutRepository>,
}

impl AppState {
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let db = DbClient::connect(&config.database_url, config.database_auth_token.clone()).await?;
        let cache = CacheClient::connect(&config.redis_url).await?;
        let storage = StorageClient::connect(
            config.storage_bucket.clone(),
            &config.storage_region,
            config.storage_endpoint_url.as_deref(),
        )
        .await;

        info!("control plane dependencies connected");

        Ok(Self {
            tenancy: Arc::new(TenancyRepository::new(db.clone())),
            identity: Arc::new(IdentityRepository::new(db.clone())),
            devices: Arc::new(DeviceRepository::new(db.clone())),
            commands: Arc::new(CommandRepository::new(db.clone())),
            alerts: Arc::new(AlertRepository::new(db.clone())),
            webhooks: Arc::new(WebhookRepository::new(db.clone())),
            sessions: Arc::new(SessionRepository::new(db.clone())),
            audit: Arc::new(AuditRepository::new(db.clone())),
            jobs: Arc::new(JobRepository::new(db.clone())),
            fanouts: Arc::new(FanoutRepository::new(db.clone())),
            db,
            cache,
            storage,
            event_bus: Arc::new(EventBus::new()),
            current_system_mode: Arc::new(RwLock::new(SystemMode::Operational)),
            config,
        })
    }

    #[instrument(skip(self))]
    pub fn set_mode(&self, mode: SystemMode) {
        match self.current_system_mode.write() {
            Ok(mut guard) => {
                info!(?mode, "system mode changed");
                *guard = mode;
            }
            Err(poisoned) => warn!("system mode lock poisoned: {poisoned}"),
        }
    }

    pub fn is_operational(&self) -> Result<(), String> {
        let guard = self.current_system_mode.read().map_err(|e| e.to_string())?;
        match &*guard {
            SystemMode::Operational => Ok(()),
            SystemMode::Maintenance(reason) => Err(reason.clone()),
        }
    }
}
