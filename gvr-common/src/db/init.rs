//! Database initialization
//!
//! Opens (creating if needed) the SQLite file backing the persistent cache
//! and brings its schema up to [`CURRENT_SCHEMA_VERSION`](super::CURRENT_SCHEMA_VERSION).

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Lock wait before SQLite returns SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize database connection and create partitions if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let pool = connect(db_path).await?;
    super::migrations::run_migrations(&pool).await?;
    Ok(pool)
}

/// Open the database and apply connection pragmas without migrating
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL: readers never wait on an in-flight cache write
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    if newly_created {
        info!(path = %db_path.display(), "Initialized new cache database");
    } else {
        info!(path = %db_path.display(), "Opened existing cache database");
    }

    Ok(pool)
}
