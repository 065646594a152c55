//! Database schema migrations
//!
//! Versioned schema migrations for the persistent cache. Each migration
//! creates the partitions introduced at that version.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - clients upgrading from older versions rely on them
//! 2. **Always add new migrations** - one migration function per schema change
//! 3. **Never touch cached rows** - partitions are only ever created, never rebuilt
//! 4. **Stay idempotent** - `CREATE TABLE IF NOT EXISTS` only

use super::partitions::Partition;
use crate::Result;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Create the schema_version tracking table
pub async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    run_migrations_to(pool, CURRENT_SCHEMA_VERSION).await
}

/// Run pending migrations up to and including `target_version`
///
/// Lets callers (and tests) stand up an older schema before upgrading it.
pub async fn run_migrations_to(pool: &SqlitePool, target_version: i32) -> Result<()> {
    create_schema_version_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version == target_version {
        info!(version = current_version, "Cache schema is up to date");
        return Ok(());
    }

    if current_version > target_version {
        warn!(
            schema = current_version,
            code = target_version,
            "Cache schema is newer than this build; leaving it untouched"
        );
        return Ok(());
    }

    info!(
        from = current_version,
        to = target_version,
        "Running cache migrations"
    );

    for version in (current_version + 1)..=target_version {
        match version {
            1 => migrate_v1(pool).await?,
            2 => migrate_v2(pool).await?,
            3 => migrate_v3(pool).await?,
            other => {
                return Err(crate::Error::Internal(format!(
                    "No migration defined for schema v{}",
                    other
                )))
            }
        }
        set_schema_version(pool, version).await?;
        info!(version, "Migration completed");
    }

    info!(version = target_version, "Cache migrations completed");
    Ok(())
}

/// Migration v1: variant and phenotype summary partitions
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!(version = 1, "Adding variant and phenotype summary partitions");
    create_partitions_for_version(pool, 1).await
}

/// Migration v2: screening summary partition
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!(version = 2, "Adding screening summary partition");
    create_partitions_for_version(pool, 2).await
}

/// Migration v3: clinical profile and interpretation partitions
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!(version = 3, "Adding clinical profile and interpretation partitions");
    create_partitions_for_version(pool, 3).await
}

async fn create_partitions_for_version(pool: &SqlitePool, version: i32) -> Result<()> {
    for partition in Partition::ALL
        .into_iter()
        .filter(|p| p.introduced_in() == version)
    {
        create_partition_table(pool, partition).await?;
        debug!(partition = %partition, "Partition ready");
    }
    Ok(())
}

/// Create one partition table (idempotent)
///
/// `seq` records insertion order for capacity eviction; an upsert deletes
/// and re-inserts, so a rewritten entry counts as newest.
pub async fn create_partition_table(pool: &SqlitePool, partition: Partition) -> Result<()> {
    let table = partition.table_name();

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL UNIQUE,
            data TEXT NOT NULL,
            saved_at INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Whether the backing table of `partition` exists
pub async fn partition_exists(pool: &SqlitePool, partition: Partition) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
    )
    .bind(partition.table_name())
    .fetch_one(pool)
    .await?;

    Ok(exists)
}
