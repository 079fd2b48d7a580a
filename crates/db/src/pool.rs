//! Postgres pool and embedded migrations for the `workflows` / `executions`
//! tables.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

pub type DbPool = PgPool;

/// Pool sizing. The server keeps a larger pool than one-shot commands such
/// as `migrate`.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_connections: 10, acquire_timeout: Duration::from_secs(30) }
    }
}

impl PoolConfig {
    pub fn single_use() -> Self {
        Self { max_connections: 2, ..Self::default() }
    }
}

pub async fn create_pool(database_url: &str, config: PoolConfig) -> Result<DbPool, DbError> {
    info!(max_connections = config.max_connections, "connecting to postgres");
    Ok(PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await?)
}

/// Applies `migrations/` at the workspace root, embedded at build time.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    let migrator = sqlx::migrate!("../../migrations");
    info!(available = migrator.iter().count(), "applying migrations");
    migrator.run(pool).await?;
    Ok(())
}
