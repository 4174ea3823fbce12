//! Storage layer: connection setup and the Store Gateway.

pub mod gateway;
pub mod models;

pub use gateway::{Snapshot, StoreGateway};

use std::path::PathBuf;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::StorageError;

/// The connection pool type used throughout the core crate.
pub type DbPool = SqlitePool;

/// Open (creating if necessary) the SQLite database at `db_path` and run
/// pending migrations.
pub async fn init_db(db_path: &str) -> Result<DbPool, StorageError> {
    let expanded = crate::config::expand_tilde(db_path);
    let path = PathBuf::from(&expanded);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Connection(sqlx::Error::Io(e))
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .connect_with(options)
        .await
        .map_err(StorageError::Connection)?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests.
#[cfg(any(test, feature = "test-helpers"))]
pub async fn init_test_db() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}
