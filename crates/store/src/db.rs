use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use mangatrack_core::config::{mask_url, PostgresConfig};

use crate::StoreResult;

/// Create a PostgreSQL connection pool and run migrations.
pub async fn init_pg_pool(config: &PostgresConfig) -> StoreResult<PgPool> {
    let url = config.database_url();
    info!("Connecting to PostgreSQL: {}", mask_url(&url));

    let statement_timeout_ms = config.statement_timeout_secs as u64 * 1000;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .after_connect(move |conn, _meta| {
            // Bound long-running statements on every pooled connection.
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {}", statement_timeout_ms))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&url)
        .await?;

    info!("PostgreSQL connected");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| sqlx::Error::Protocol(format!("migration failed: {}", e)))?;
    info!("Database migrations applied");

    Ok(pool)
}
