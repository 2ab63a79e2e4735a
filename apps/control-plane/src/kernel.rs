//! Composition root: builds `AppState` from config, spawns the
//! background workers, and serves the router. Split out of `main.rs` so
//! `bin/seed.rs` and `bin/migrator.rs` can construct an `AppState`
//! without duplicating the wiring.

use std::net::{IpAddr, SocketAddr};

use tracing::{error, info, instrument};

use crate::config::Config;
use crate::routes::build_router;
use crate::services::{spawn_alert_engine, spawn_cert_renewal_worker, spawn_fanout_worker, spawn_sweeper, spawn_webhook_worker};
use crate::state::AppState;

pub struct Kernel {
    port: u16,
    state: AppState,
}

impl Kernel {
    #[instrument(skip_all)]
    pub async fn ignite(config: Config) -> anyhow::Result<Self> {
        let port = config.port;
        let state = AppState::new(config).await?;
        Ok(Self { port, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Spawns the webhook delivery, housekeeping sweep, alert engine,
    /// cert renewal, and deployment/patch fanout workers, then blocks
    /// serving HTTP until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let Kernel { port, state } = self;
        spawn_webhook_worker(state.clone());
        spawn_sweeper(state.clone());
        spawn_alert_engine(state.clone());
        spawn_cert_renewal_worker(state.clone());
        spawn_fanout_worker(state.clone());

        let router = build_router(state);
        let addr = SocketAddr::new("0.0.0.0".parse::<IpAddr>().unwrap(), port);
        info!(%addr, "control plane listening");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "http server terminated");
            return Err(e.into());
        }
        Ok(())
    }
}
