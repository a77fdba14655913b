//! Durable keyed storage for replicated records and cached blobs.
//!
//! Records and cache entries live in separate tables and never interfere:
//! the admission policy only ever evicts cache entries. Reads of records are
//! served from an in-memory view that is refreshed after each commit, so a
//! failed write never leaves a value visible that is not on disk.

use crate::db::{begin_write, from_sql, to_sql, Pool};
use crate::error::{Result, SyncError};
use dashmap::DashMap;
use ferry_engine::{
    AdmissionPolicy, CacheEntryMeta, PayloadCodec, RecordId, ReplicatedRecord, Timestamp,
    VectorClock,
};
use sqlx::Row;
use std::sync::Arc;

/// Records plus a byte-budgeted blob cache.
#[derive(Clone)]
pub struct LocalStore {
    pool: Pool,
    codec: Arc<dyn PayloadCodec>,
    records: Arc<DashMap<RecordId, ReplicatedRecord>>,
    admission: AdmissionPolicy,
}

impl LocalStore {
    /// Open the store and load every record into the read view.
    pub async fn open(
        pool: Pool,
        codec: Arc<dyn PayloadCodec>,
        cache_budget_bytes: u64,
    ) -> Result<Self> {
        let store = Self {
            pool,
            codec,
            records: Arc::new(DashMap::new()),
            admission: AdmissionPolicy::new(cache_budget_bytes),
        };

        let rows = sqlx::query("SELECT id, collection, clock, payload, tombstone FROM records")
            .fetch_all(&store.pool)
            .await?;
        for row in &rows {
            let record = store.record_from_row(row)?;
            store.records.insert(record.id.clone(), record);
        }

        tracing::debug!(records = store.records.len(), "Local store opened");
        Ok(store)
    }

    /// Upsert a record by id. Durable before returning.
    pub async fn put(&self, record: &ReplicatedRecord, now: Timestamp) -> Result<()> {
        let clock = serde_json::to_string(&record.clock)?;
        let payload = self.codec.encode(&record.payload)?;

        let mut tx = begin_write(&self.pool).await?;
        sqlx::query(
            "INSERT INTO records (id, collection, clock, payload, tombstone, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                collection = excluded.collection,
                clock = excluded.clock,
                payload = excluded.payload,
                tombstone = excluded.tombstone,
                updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.collection)
        .bind(clock)
        .bind(payload)
        .bind(record.tombstone)
        .bind(to_sql(now))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    /// The stored record, tombstoned or not.
    pub fn get(&self, id: &str) -> Option<ReplicatedRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// The stored record if it has not been deleted.
    pub fn get_active(&self, id: &str) -> Option<ReplicatedRecord> {
        self.get(id).filter(ReplicatedRecord::is_active)
    }

    /// Live records of one collection, ordered by id.
    pub fn list(&self, collection: &str) -> Vec<ReplicatedRecord> {
        let mut records: Vec<ReplicatedRecord> = self
            .records
            .iter()
            .filter(|entry| entry.collection == collection && entry.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Number of stored records, tombstones included.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Write a blob, evicting least-recently-used entries until it fits.
    ///
    /// The write is always admitted, even if it alone exceeds the budget.
    /// Returns the evicted keys.
    pub async fn cache_put(&self, key: &str, data: &[u8], size_bytes: u64) -> Result<Vec<String>> {
        let mut tx = begin_write(&self.pool).await?;

        let rows = sqlx::query("SELECT key, size_bytes, last_access FROM cache_entries")
            .fetch_all(&mut *tx)
            .await?;
        let resident = rows
            .iter()
            .map(|row| -> std::result::Result<CacheEntryMeta, sqlx::Error> {
                Ok(CacheEntryMeta {
                    key: row.try_get("key")?,
                    size_bytes: from_sql(row.try_get("size_bytes")?),
                    last_access: from_sql(row.try_get("last_access")?),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let evicted = self.admission.plan(&resident, key, size_bytes);
        for victim in &evicted {
            sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                .bind(victim)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO cache_entries (key, data, size_bytes, last_access)
             VALUES (?, ?, ?, (SELECT COALESCE(MAX(last_access), 0) + 1 FROM cache_entries))
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                size_bytes = excluded.size_bytes,
                last_access = excluded.last_access",
        )
        .bind(key)
        .bind(data)
        .bind(to_sql(size_bytes))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if !evicted.is_empty() {
            tracing::info!(key, evicted = ?evicted, "Evicted cache entries to admit write");
        }
        if size_bytes > self.admission.budget_bytes {
            tracing::warn!(
                key,
                size_bytes,
                budget = self.admission.budget_bytes,
                "Cache entry exceeds the whole budget"
            );
        }

        Ok(evicted)
    }

    /// Read a blob and mark it most recently used.
    pub async fn cache_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut tx = begin_write(&self.pool).await?;
        let touched = sqlx::query(
            "UPDATE cache_entries
             SET last_access = (SELECT COALESCE(MAX(last_access), 0) + 1 FROM cache_entries)
             WHERE key = ?",
        )
        .bind(key)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if touched == 0 {
            return Ok(None);
        }

        let data: Vec<u8> = sqlx::query_scalar("SELECT data FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(data))
    }

    pub async fn cache_remove(&self, key: &str) -> Result<bool> {
        let mut tx = begin_write(&self.pool).await?;
        let removed = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Aggregate bytes held by the cache.
    pub async fn cache_size(&self) -> Result<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries")
                .fetch_one(&self.pool)
                .await?;
        Ok(from_sql(total))
    }

    pub fn cache_budget(&self) -> u64 {
        self.admission.budget_bytes
    }

    fn record_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<ReplicatedRecord> {
        let clock: String = row.try_get("clock")?;
        let clock: VectorClock = serde_json::from_str(&clock)
            .map_err(|e| SyncError::corrupt("records", format!("clock: {}", e)))?;
        let payload: Vec<u8> = row.try_get("payload")?;

        Ok(ReplicatedRecord {
            id: row.try_get("id")?,
            collection: row.try_get("collection")?,
            clock,
            payload: self.codec.decode(&payload)?,
            tombstone: row.try_get("tombstone")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, run_migrations};
    use ferry_engine::JsonCodec;
    use serde_json::json;

    async fn store(budget: u64) -> LocalStore {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        LocalStore::open(pool, Arc::new(JsonCodec), budget).await.unwrap()
    }

    #[tokio::test]
    async fn tombstones_are_kept_but_hidden_from_listing() {
        let store = store(1024).await;
        let clock = VectorClock::from_iter([("r", 1)]);
        let live = ReplicatedRecord::new("a", "rooms", json!({"n": 1}), clock.clone());
        let gone = ReplicatedRecord::new("b", "rooms", json!({"n": 2}), clock).delete("r");

        store.put(&live, 1).await.unwrap();
        store.put(&gone, 2).await.unwrap();

        assert_eq!(store.list("rooms"), vec![live]);
        assert!(store.get_active("b").is_none());
        assert!(store.get("b").unwrap().tombstone);
        assert_eq!(store.record_count(), 2);
    }

    #[tokio::test]
    async fn cache_get_refreshes_recency() {
        let store = store(100).await;
        store.cache_put("a", b"a", 40).await.unwrap();
        store.cache_put("b", b"b", 40).await.unwrap();
        assert_eq!(store.cache_get("a").await.unwrap(), Some(b"a".to_vec()));

        let evicted = store.cache_put("c", b"c", 40).await.unwrap();
        assert_eq!(evicted, vec!["b".to_string()]);
        assert_eq!(store.cache_size().await.unwrap(), 80);
    }

    #[tokio::test]
    async fn cache_miss_and_remove() {
        let store = store(100).await;
        assert_eq!(store.cache_get("nope").await.unwrap(), None);

        store.cache_put("k", b"v", 1).await.unwrap();
        assert!(store.cache_remove("k").await.unwrap());
        assert!(!store.cache_remove("k").await.unwrap());
        assert_eq!(store.cache_size().await.unwrap(), 0);
    }
}
