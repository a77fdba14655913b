//! Sync scalars: the device's replica id and the last successful pull.

use super::{begin_write, Pool};
use crate::error::{Result, SyncError};
use ferry_engine::{ReplicaId, Timestamp};
use sqlx::Row;

const REPLICA_ID_KEY: &str = "replica_id";
const LAST_PULL_KEY: &str = "last_pull";

/// Key/value scalars persisted next to the sync collections.
#[derive(Debug, Clone)]
pub struct SyncMeta {
    pool: Pool,
}

impl SyncMeta {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// The device's replica id, generated and persisted on first use.
    ///
    /// The insert is a no-op once a value exists, so concurrent first calls
    /// agree on a single id.
    pub async fn replica_id(&self) -> Result<ReplicaId> {
        let candidate = uuid::Uuid::new_v4().to_string();

        let mut tx = begin_write(&self.pool).await?;
        sqlx::query("INSERT OR IGNORE INTO sync_meta (key, value) VALUES (?, ?)")
            .bind(REPLICA_ID_KEY)
            .bind(&candidate)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("SELECT value FROM sync_meta WHERE key = ?")
            .bind(REPLICA_ID_KEY)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let id: String = row.try_get("value")?;
        if id == candidate {
            tracing::info!(replica_id = %id, "Generated replica id");
        }
        Ok(id)
    }

    /// Timestamp of the last pull that merged completely (0 if none).
    pub async fn last_pull(&self) -> Result<Timestamp> {
        let row = sqlx::query("SELECT value FROM sync_meta WHERE key = ?")
            .bind(LAST_PULL_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(0),
            Some(row) => {
                let value: String = row.try_get("value")?;
                value.parse().map_err(|_| {
                    SyncError::corrupt("sync_meta", format!("last_pull = {:?}", value))
                })
            }
        }
    }

    pub async fn set_last_pull(&self, at: Timestamp) -> Result<()> {
        let mut tx = begin_write(&self.pool).await?;
        sqlx::query(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_PULL_KEY)
        .bind(at.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, run_migrations};

    async fn meta() -> SyncMeta {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        SyncMeta::new(pool)
    }

    #[tokio::test]
    async fn replica_id_is_stable() {
        let meta = meta().await;
        let first = meta.replica_id().await.unwrap();
        let second = meta.replica_id().await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn last_pull_defaults_to_zero() {
        let meta = meta().await;
        assert_eq!(meta.last_pull().await.unwrap(), 0);

        meta.set_last_pull(1_706_745_600_000).await.unwrap();
        assert_eq!(meta.last_pull().await.unwrap(), 1_706_745_600_000);
    }
}
