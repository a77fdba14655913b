//! Durable list of conflicts parked by the manual strategy.

use super::{begin_write, decode, encode, from_sql, to_sql, Pool};
use crate::error::{Result, SyncError};
use ferry_engine::{Conflict, PayloadCodec, Timestamp};
use sqlx::Row;
use std::sync::Arc;

/// A parked conflict with its storage identity.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConflict {
    pub id: i64,
    pub conflict: Conflict,
    pub detected_at: Timestamp,
}

/// Pending conflicts, oldest first.
#[derive(Clone)]
pub struct ConflictLog {
    pool: Pool,
    codec: Arc<dyn PayloadCodec>,
}

impl ConflictLog {
    pub fn new(pool: Pool, codec: Arc<dyn PayloadCodec>) -> Self {
        Self { pool, codec }
    }

    /// Park both versions. Returns the conflict's id.
    pub async fn add(&self, conflict: &Conflict, now: Timestamp) -> Result<i64> {
        let blob = encode(self.codec.as_ref(), conflict)?;

        let mut tx = begin_write(&self.pool).await?;
        let id = sqlx::query(
            "INSERT INTO pending_conflicts (entity, collection, conflict, detected_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&conflict.entity)
        .bind(&conflict.collection)
        .bind(blob)
        .bind(to_sql(now))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<PendingConflict> {
        let row = sqlx::query(
            "SELECT id, conflict, detected_at FROM pending_conflicts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SyncError::ConflictNotFound(id))?;

        self.from_row(&row)
    }

    /// All pending conflicts in detection order.
    pub async fn list(&self) -> Result<Vec<PendingConflict>> {
        let rows =
            sqlx::query("SELECT id, conflict, detected_at FROM pending_conflicts ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(|row| self.from_row(row)).collect()
    }

    /// Pending conflicts for one entity.
    pub async fn for_entity(&self, entity: &str) -> Result<Vec<PendingConflict>> {
        let rows = sqlx::query(
            "SELECT id, conflict, detected_at FROM pending_conflicts WHERE entity = ? ORDER BY id",
        )
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.from_row(row)).collect()
    }

    pub async fn remove(&self, id: i64) -> Result<bool> {
        let mut tx = begin_write(&self.pool).await?;
        let removed = sqlx::query("DELETE FROM pending_conflicts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    pub async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_conflicts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    fn from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<PendingConflict> {
        let blob: Vec<u8> = row.try_get("conflict")?;
        Ok(PendingConflict {
            id: row.try_get("id")?,
            conflict: decode(self.codec.as_ref(), &blob)?,
            detected_at: from_sql(row.try_get("detected_at")?),
        })
    }
}
