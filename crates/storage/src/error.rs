use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("connection unavailable: {0}")]
    Unavailable(String),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("pool size must be at least 1")]
    InvalidPoolSize,
}

impl StorageError {
    /// Whether the error means the connection itself can no longer be trusted.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            StorageError::Database(
                sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed
            ) | StorageError::Unavailable(_)
        )
    }
}

impl From<StorageError> for starshop_core::AppError {
    fn from(e: StorageError) -> Self {
        starshop_core::AppError::Database(e.to_string())
    }
}
