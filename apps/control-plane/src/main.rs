//! Binary entry point: load configuration, initialize tracing, and hand
//! off to the kernel.

use breeze_control_plane::prelude::*;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    breeze_shared_telemetry::init_tracing("breeze_control_plane");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async {
        let config = Config::from_env();
        info!(port = config.port, "starting control plane");

        let kernel = Kernel::ignite(config).await.map_err(|e| {
            error!(error = %e, "failed to initialize control plane");
            e
        })?;

        kernel.run().await
    })
}
