use crate::error::DbError;
use configuration::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    if config.url.is_empty() {
        return Err(DbError::ConnectionConfigError("database.url must be set.".to_string()));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Applies the embedded migrations so the schema is current before the engine starts.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
