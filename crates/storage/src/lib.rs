pub mod error;
pub mod models;
pub mod pool;
pub mod repos;
pub mod store;

pub use error::StorageError;
pub use pool::{Checkout, ConnectionPool, Connector, PoolStatus, PooledConnection};
pub use store::{DEFAULT_USAGE_WINDOW, Store, USAGE_RETENTION};

use sqlx::ConnectOptions;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Schema migrations, embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Opens WAL-mode SQLite connections to one database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
}

impl SqliteConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .disable_statement_logging();
        Self { options }
    }
}

impl Connector for SqliteConnector {
    type Connection = SqliteConnection;

    fn connect(&self) -> impl Future<Output = Result<SqliteConnection, StorageError>> + Send {
        async move {
            self.options
                .connect()
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        }
    }
}
