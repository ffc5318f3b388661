use std::time::Duration;

use sqlx::{PgPool, migrate::Migrator, postgres::PgPoolOptions};
use tracing::info;

use crate::error::{IngestError, Result};

/// Schema contract shipped with the crate.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
        .map_err(|e| IngestError::StateStore(format!("failed to connect to Postgres: {e}")))?;
    info!("Connected to Postgres (max {max_connections} connections)");
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("failed to run migrations: {e}")))?;
    info!("Database migrations applied");
    Ok(())
}
