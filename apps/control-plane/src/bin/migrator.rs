//! Applies the control plane's schema and any pending evolutions against
//! `DATABASE_URL`. Run once per deploy, ahead of the API process.

use breeze_infra_db::schema::{apply_evolutions, apply_schema};
use breeze_infra_db::DbClient;
use dotenvy::dotenv;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    breeze_shared_telemetry::init_tracing("breeze_migrator");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        info!("applying schema");

        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let database_token = std::env::var("TURSO_AUTH_TOKEN").ok();

        let db = DbClient::connect(&database_url, database_token).await?;
        let conn = db.conn()?;

        apply_schema(&conn).await?;
        apply_evolutions(&conn).await?;

        info!("schema up to date");
        Ok(())
    })
    .map_err(|e: anyhow::Error| {
        error!(error = %e, "migration failed");
        e
    })
}
