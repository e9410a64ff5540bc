pub mod credentials;
pub mod cursors;
pub mod jobs;
pub mod staging;

use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// DDL for the tables owned by the sync core. Every statement is idempotent.
pub const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_sync_core.sql");

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> ShopsyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))
}

/// Apply [`SCHEMA_SQL`] to the given pool.
pub async fn apply_schema(pool: &PgPool) -> ShopsyncResult<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;
    Ok(())
}

fn lock_poisoned<T>(_: std::sync::PoisonError<T>) -> ShopsyncError {
    ShopsyncError::Internal("in-memory store lock poisoned".to_string())
}

/// Connect to `TEST_DATABASE_URL` and apply the schema, or `None` when unset.
#[cfg(test)]
pub(crate) async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = create_pool(&url).await.expect("db should connect");
    apply_schema(&pool).await.ok()?;
    Some(pool)
}
