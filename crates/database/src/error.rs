use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid database connection settings: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Stored row is invalid: {0}")]
    InvalidData(String),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("Trade {0} is already closed")]
    AlreadyClosed(Uuid),
}

impl From<core_types::CoreError> for DbError {
    fn from(e: core_types::CoreError) -> Self {
        DbError::InvalidData(e.to_string())
    }
}
