//! Persistent partitioned store
//!
//! Durable cache of session payloads in SQLite, one table per
//! [`Partition`]. This store is an optimization, never a source of truth:
//! every failure is logged and absorbed. Reads that fail are misses; writes
//! that fail are no-ops. When the database cannot be opened at all the
//! store runs disabled and the system falls back to network-only loading.
//!
//! - **TTL** is evaluated lazily on read; an expired entry is deleted and
//!   reported as a miss. There is no background sweeper.
//! - **Capacity** is enforced after every write by deleting the oldest
//!   entries (insertion order) until the partition is back at its limit.
//! - Concurrent writers (several processes on one file) get last-write-wins.

use crate::models::{SessionDataset, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gvr_common::db::{init_database, Partition};
use gvr_common::{CacheLimits, Clock, SystemClock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A cached payload with its owner and write time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub session_id: SessionId,
    pub data: T,
    pub saved_at: DateTime<Utc>,
}

/// SQLite-backed store with per-entry TTL and per-partition capacity
pub struct PartitionedStore {
    pool: Option<SqlitePool>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    max_entries: usize,
}

impl PartitionedStore {
    /// Open (creating and migrating as needed) the store at `db_path`
    pub async fn open(
        db_path: &Path,
        limits: CacheLimits,
        clock: Arc<dyn Clock>,
    ) -> gvr_common::Result<Self> {
        let pool = init_database(db_path).await?;
        Ok(Self::from_pool(pool, limits, clock))
    }

    /// Open, or fall back to a disabled store if the database is unusable
    pub async fn open_or_disabled(db_path: &Path, limits: CacheLimits) -> Self {
        match Self::open(db_path, limits, Arc::new(SystemClock)).await {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    path = %db_path.display(),
                    error = %e,
                    "Persistent cache unavailable, continuing network-only"
                );
                Self::disabled()
            }
        }
    }

    /// Wrap an already-migrated pool
    pub fn from_pool(pool: SqlitePool, limits: CacheLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: Some(pool),
            clock,
            ttl_ms: i64::try_from(limits.entry_ttl.as_millis()).unwrap_or(i64::MAX),
            max_entries: limits.max_entries_per_partition,
        }
    }

    /// A store where every read misses and every write is dropped
    pub fn disabled() -> Self {
        let limits = CacheLimits::default();
        Self {
            pool: None,
            clock: Arc::new(SystemClock),
            ttl_ms: i64::try_from(limits.entry_ttl.as_millis()).unwrap_or(i64::MAX),
            max_entries: limits.max_entries_per_partition,
        }
    }

    pub fn is_available(&self) -> bool {
        self.pool.is_some()
    }

    /// Payload for `session`, or `None` on miss, expiry or failure
    pub async fn get<T: DeserializeOwned>(&self, partition: Partition, session: &SessionId) -> Option<T> {
        self.entry(partition, session).await.map(|entry| entry.data)
    }

    /// Full entry for `session`, with the same miss semantics as [`get`](Self::get)
    pub async fn entry<T: DeserializeOwned>(
        &self,
        partition: Partition,
        session: &SessionId,
    ) -> Option<CacheEntry<T>> {
        let pool = self.pool.as_ref()?;
        match self.try_entry(pool, partition, session).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(partition = %partition, session = %session, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Upsert with a fresh timestamp, then enforce partition capacity
    pub async fn set<T: Serialize>(&self, partition: Partition, session: &SessionId, data: &T) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        if let Err(e) = self.try_set(pool, partition, session, data).await {
            warn!(partition = %partition, session = %session, error = %e, "Cache write failed, dropped");
        }
    }

    pub async fn delete(&self, partition: Partition, session: &SessionId) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        if let Err(e) = try_delete(pool, partition, session).await {
            warn!(partition = %partition, session = %session, error = %e, "Cache delete failed");
        }
    }

    /// Entries currently held in `partition` (0 when unavailable)
    pub async fn len(&self, partition: Partition) -> usize {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        let count: Result<i64, sqlx::Error> =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", partition.table_name()))
                .fetch_one(pool)
                .await;
        match count {
            Ok(count) => usize::try_from(count).unwrap_or(0),
            Err(e) => {
                warn!(partition = %partition, error = %e, "Cache count failed");
                0
            }
        }
    }

    async fn try_entry<T: DeserializeOwned>(
        &self,
        pool: &SqlitePool,
        partition: Partition,
        session: &SessionId,
    ) -> gvr_common::Result<Option<CacheEntry<T>>> {
        let row = sqlx::query(&format!(
            "SELECT data, saved_at FROM {} WHERE session_id = ?",
            partition.table_name()
        ))
        .bind(session.as_str())
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let saved_at_ms: i64 = row.try_get("saved_at")?;
        let now_ms = self.clock.now().timestamp_millis();

        if now_ms.saturating_sub(saved_at_ms) > self.ttl_ms {
            debug!(partition = %partition, session = %session, "Cache entry expired");
            try_delete(pool, partition, session).await?;
            return Ok(None);
        }

        let data: String = row.try_get("data")?;
        let data: T = match serde_json::from_str(&data) {
            Ok(data) => data,
            Err(e) => {
                warn!(partition = %partition, session = %session, error = %e, "Discarding undecodable cache entry");
                try_delete(pool, partition, session).await?;
                return Ok(None);
            }
        };

        let saved_at = DateTime::from_timestamp_millis(saved_at_ms).ok_or_else(|| {
            gvr_common::Error::Internal(format!("saved_at out of range: {}", saved_at_ms))
        })?;

        Ok(Some(CacheEntry {
            session_id: session.clone(),
            data,
            saved_at,
        }))
    }

    async fn try_set<T: Serialize>(
        &self,
        pool: &SqlitePool,
        partition: Partition,
        session: &SessionId,
        data: &T,
    ) -> gvr_common::Result<()> {
        // Serialize before touching the database
        let data = serde_json::to_string(data)?;
        let saved_at = self.clock.now().timestamp_millis();
        let table = partition.table_name();

        let mut tx = pool.begin().await?;

        // Delete + insert so the entry takes a fresh insertion position
        sqlx::query(&format!("DELETE FROM {} WHERE session_id = ?", table))
            .bind(session.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            "INSERT INTO {} (session_id, data, saved_at) VALUES (?, ?, ?)",
            table
        ))
        .bind(session.as_str())
        .bind(&data)
        .bind(saved_at)
        .execute(&mut *tx)
        .await?;

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&mut *tx)
            .await?;

        let excess = count - self.max_entries as i64;
        if excess > 0 {
            let evicted = sqlx::query(&format!(
                "DELETE FROM {table} WHERE seq IN (SELECT seq FROM {table} ORDER BY seq ASC LIMIT ?)"
            ))
            .bind(excess)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            debug!(partition = %partition, evicted, "Evicted oldest cache entries");
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn try_delete(pool: &SqlitePool, partition: Partition, session: &SessionId) -> gvr_common::Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE session_id = ?", partition.table_name()))
        .bind(session.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Persistent tier as seen by the session controller
#[async_trait]
pub trait DatasetTier: Send + Sync {
    async fn load(&self, session: &SessionId) -> Option<SessionDataset>;

    async fn save(&self, session: &SessionId, dataset: &SessionDataset);

    async fn remove(&self, session: &SessionId);
}

#[async_trait]
impl DatasetTier for PartitionedStore {
    async fn load(&self, session: &SessionId) -> Option<SessionDataset> {
        self.get(Partition::VariantSummaries, session).await
    }

    async fn save(&self, session: &SessionId, dataset: &SessionDataset) {
        self.set(Partition::VariantSummaries, session, dataset).await
    }

    async fn remove(&self, session: &SessionId) {
        self.delete(Partition::VariantSummaries, session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_store_misses_and_ignores_writes() {
        let store = PartitionedStore::disabled();
        let session = SessionId::new("abc123");

        store.set(Partition::VariantSummaries, &session, &"payload").await;
        let value: Option<String> = store.get(Partition::VariantSummaries, &session).await;

        assert!(!store.is_available());
        assert_eq!(value, None);
        assert_eq!(store.len(Partition::VariantSummaries).await, 0);
    }

    #[tokio::test]
    async fn test_open_or_disabled_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        // A directory where the database file should be cannot be opened
        let blocked = dir.path().join("blocked");
        std::fs::create_dir_all(blocked.join("gvr-cache.db")).unwrap();

        let store =
            PartitionedStore::open_or_disabled(&blocked.join("gvr-cache.db"), CacheLimits::default()).await;
        assert!(!store.is_available());
    }
}
