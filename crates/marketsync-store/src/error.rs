use marketsync_core::CoreError;

use crate::encryption::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            #[cfg(feature = "postgres")]
            StoreError::Database(e) => match e {
                sqlx::Error::Database(db_err) => {
                    let code = db_err.code().unwrap_or_default();
                    let message = db_err.message();

                    // Postgres SQLSTATE codes
                    match code.as_ref() {
                        "23505" => CoreError::Conflict(format!(
                            "Unique constraint violation: {}",
                            message
                        )),
                        "23503" => CoreError::Invalid(format!(
                            "Foreign key constraint failed: {}",
                            message
                        )),
                        "42501" => CoreError::Db(format!("Row-level security denied: {}", message)),
                        _ => CoreError::Db(format!("Database error ({}): {}", code, message)),
                    }
                }
                sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
                other => CoreError::Db(other.to_string()),
            },
            StoreError::Serialization(e) => CoreError::Serde(e.to_string()),
            StoreError::Vault(e) => CoreError::Invalid(e.to_string()),
            StoreError::Core(e) => e,
            StoreError::NotFound(msg) => CoreError::NotFound(msg),
            StoreError::Migration(msg) => CoreError::Db(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
