//! Durable FIFO of pending operations plus the failed-operations log.
//!
//! The queue is capacity-bounded: once full, enqueueing drops the oldest
//! operations instead of rejecting the new write. Callers learn about the
//! loss through the returned [`Enqueued::dropped`] list.

use crate::db::{begin_write, decode, encode, from_sql, to_sql, Pool};
use crate::error::{Result, SyncError};
use ferry_engine::{
    Backoff, FailedOperation, NewOperation, OperationKind, PayloadCodec, SyncOperation, Timestamp,
    VectorClock,
};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashSet;
use std::sync::Arc;

/// Result of adding an operation to the live queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub operation: SyncOperation,
    /// Oldest operations removed to stay within capacity
    pub dropped: Vec<SyncOperation>,
}

/// What `fail` did with the operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Still queued; not attempted again before `next_attempt_at`
    Retrying {
        operation: SyncOperation,
        next_attempt_at: Timestamp,
    },
    /// Retry ceiling exceeded; moved to the failed-operations log
    Parked(FailedOperation),
}

/// A stored operation row.
struct StoredOperation {
    seq: i64,
    op_id: String,
    kind: String,
    collection: String,
    entity: String,
    payload: Vec<u8>,
    clock: String,
    enqueued_at: i64,
    retries: i64,
    next_attempt_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for StoredOperation {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredOperation {
            seq: row.try_get("seq")?,
            op_id: row.try_get("op_id")?,
            kind: row.try_get("kind")?,
            collection: row.try_get("collection")?,
            entity: row.try_get("entity")?,
            payload: row.try_get("payload")?,
            clock: row.try_get("clock")?,
            enqueued_at: row.try_get("enqueued_at")?,
            retries: row.try_get("retries")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
        })
    }
}

impl StoredOperation {
    fn into_operation(self, codec: &dyn PayloadCodec) -> Result<SyncOperation> {
        let clock: VectorClock = serde_json::from_str(&self.clock).map_err(|e| {
            SyncError::corrupt("operations", format!("clock of {}: {}", self.op_id, e))
        })?;
        let retries = u32::try_from(self.retries)
            .map_err(|_| SyncError::corrupt("operations", format!("retries = {}", self.retries)))?;

        Ok(SyncOperation {
            kind: OperationKind::parse(&self.kind)?,
            collection: self.collection,
            entity: self.entity,
            payload: codec.decode(&self.payload)?,
            clock,
            enqueued_at: from_sql(self.enqueued_at),
            retries,
            next_attempt_at: from_sql(self.next_attempt_at),
            id: self.op_id,
        })
    }
}

const SELECT_OPERATIONS: &str = "SELECT seq, op_id, kind, collection, entity, payload, \
     clock, enqueued_at, retries, next_attempt_at FROM operations";

/// The live operation queue.
#[derive(Clone)]
pub struct SyncQueue {
    pool: Pool,
    codec: Arc<dyn PayloadCodec>,
    capacity: usize,
    backoff: Backoff,
}

impl SyncQueue {
    pub fn new(
        pool: Pool,
        codec: Arc<dyn PayloadCodec>,
        capacity: usize,
        backoff: Backoff,
    ) -> Self {
        Self {
            pool,
            codec,
            capacity: capacity.max(1),
            backoff,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an operation with a fresh id and zero retries.
    pub async fn enqueue(&self, draft: NewOperation, now: Timestamp) -> Result<Enqueued> {
        draft.validate()?;
        let operation = draft.into_operation(uuid::Uuid::new_v4().to_string(), now);

        let mut tx = begin_write(&self.pool).await?;
        self.insert(&mut tx, &operation, None).await?;
        let dropped = self.trim_to_capacity(&mut tx, &operation.id).await?;
        tx.commit().await?;

        tracing::debug!(
            op_id = %operation.id,
            entity = %operation.entity,
            kind = operation.kind.as_str(),
            "Operation enqueued"
        );
        log_dropped(&dropped);

        Ok(Enqueued { operation, dropped })
    }

    /// Up to `batch_size` operations that may be attempted at `now`, in
    /// enqueue order.
    ///
    /// An entity whose oldest queued operation is still backing off is
    /// skipped entirely, so operations on one entity are never sent out of
    /// order.
    pub async fn drain(&self, batch_size: usize, now: Timestamp) -> Result<Vec<SyncOperation>> {
        let mut blocked: HashSet<String> = HashSet::new();
        let mut batch = Vec::new();

        for operation in self.pending().await? {
            if batch.len() >= batch_size {
                break;
            }
            if blocked.contains(&operation.entity) {
                continue;
            }
            if !operation.is_due(now) {
                blocked.insert(operation.entity);
                continue;
            }
            batch.push(operation);
        }

        Ok(batch)
    }

    /// Remove an operation after the backend confirmed it.
    pub async fn ack(&self, op_id: &str) -> Result<SyncOperation> {
        let mut tx = begin_write(&self.pool).await?;
        let (_, operation) = self.fetch(&mut tx, op_id).await?;
        self.delete(&mut tx, op_id).await?;
        tx.commit().await?;

        tracing::debug!(op_id, entity = %operation.entity, "Operation acknowledged");
        Ok(operation)
    }

    /// Record a failed attempt.
    ///
    /// Once the retry counter exceeds the ceiling the operation leaves the
    /// live queue and is appended to the failed-operations log.
    pub async fn fail(&self, op_id: &str, reason: &str, now: Timestamp) -> Result<FailOutcome> {
        let mut tx = begin_write(&self.pool).await?;
        let (seq, mut operation) = self.fetch(&mut tx, op_id).await?;
        operation.retries += 1;

        if operation.is_exhausted() {
            self.delete(&mut tx, op_id).await?;
            let failed = self.append_failed(&mut tx, seq, operation, reason, now).await?;
            tx.commit().await?;

            tracing::warn!(
                op_id,
                entity = %failed.operation.entity,
                retries = failed.operation.retries,
                reason,
                "Retry ceiling exceeded, operation parked"
            );
            return Ok(FailOutcome::Parked(failed));
        }

        let next_attempt_at = now.saturating_add(self.backoff.delay_millis(operation.retries));
        operation.next_attempt_at = next_attempt_at;
        sqlx::query("UPDATE operations SET retries = ?, next_attempt_at = ? WHERE op_id = ?")
            .bind(i64::from(operation.retries))
            .bind(to_sql(next_attempt_at))
            .bind(op_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            op_id,
            retries = operation.retries,
            next_attempt_at,
            reason,
            "Operation will be retried"
        );
        Ok(FailOutcome::Retrying {
            operation,
            next_attempt_at,
        })
    }

    /// Move an operation straight to the failed-operations log.
    pub async fn park(&self, op_id: &str, reason: &str, now: Timestamp) -> Result<FailedOperation> {
        let mut tx = begin_write(&self.pool).await?;
        let (seq, operation) = self.fetch(&mut tx, op_id).await?;
        self.delete(&mut tx, op_id).await?;
        let failed = self.append_failed(&mut tx, seq, operation, reason, now).await?;
        tx.commit().await?;

        tracing::warn!(op_id, entity = %failed.operation.entity, reason, "Operation parked");
        Ok(failed)
    }

    /// Put a parked operation back on the live queue with zero retries.
    ///
    /// The operation regains the queue position it held before it was
    /// parked, so it is sent ahead of anything enqueued for the same entity
    /// since. The log entry is stamped with `requeued_at` rather than removed.
    pub async fn requeue_failed(&self, op_id: &str, now: Timestamp) -> Result<Enqueued> {
        let mut tx = begin_write(&self.pool).await?;
        let row = sqlx::query(
            "SELECT id, seq, operation FROM failed_operations
             WHERE op_id = ? AND requeued_at IS NULL
             ORDER BY id DESC LIMIT 1",
        )
        .bind(op_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SyncError::OperationNotFound(op_id.to_string()))?;

        let log_id: i64 = row.try_get("id")?;
        let seq: Option<i64> = row.try_get("seq")?;
        let blob: Vec<u8> = row.try_get("operation")?;
        let failed: FailedOperation = decode(self.codec.as_ref(), &blob)?;

        let mut operation = failed.operation;
        operation.retries = 0;
        operation.next_attempt_at = now;

        sqlx::query("UPDATE failed_operations SET requeued_at = ? WHERE id = ?")
            .bind(to_sql(now))
            .bind(log_id)
            .execute(&mut *tx)
            .await?;
        self.insert(&mut tx, &operation, seq).await?;
        let dropped = self.trim_to_capacity(&mut tx, &operation.id).await?;
        tx.commit().await?;

        tracing::info!(op_id, entity = %operation.entity, "Failed operation requeued");
        log_dropped(&dropped);

        Ok(Enqueued { operation, dropped })
    }

    pub async fn get(&self, op_id: &str) -> Result<Option<SyncOperation>> {
        let query = format!("{} WHERE op_id = ?", SELECT_OPERATIONS);
        let stored = sqlx::query_as::<_, StoredOperation>(&query)
            .bind(op_id)
            .fetch_optional(&self.pool)
            .await?;
        stored
            .map(|stored| stored.into_operation(self.codec.as_ref()))
            .transpose()
    }

    /// Every queued operation in enqueue order.
    pub async fn pending(&self) -> Result<Vec<SyncOperation>> {
        let query = format!("{} ORDER BY seq", SELECT_OPERATIONS);
        let stored = sqlx::query_as::<_, StoredOperation>(&query)
            .fetch_all(&self.pool)
            .await?;
        stored
            .into_iter()
            .map(|stored| stored.into_operation(self.codec.as_ref()))
            .collect()
    }

    /// The failed-operations log, oldest first.
    pub async fn failed(&self) -> Result<Vec<FailedOperation>> {
        let rows = sqlx::query("SELECT operation, requeued_at FROM failed_operations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<FailedOperation> {
                let blob: Vec<u8> = row.try_get("operation")?;
                let mut failed: FailedOperation = decode(self.codec.as_ref(), &blob)?;
                let requeued_at: Option<i64> = row.try_get("requeued_at")?;
                failed.requeued_at = requeued_at.map(from_sql);
                Ok(failed)
            })
            .collect()
    }

    pub async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Insert at `seq`, or at the tail when `None`.
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        operation: &SyncOperation,
        seq: Option<i64>,
    ) -> Result<()> {
        let payload = self.codec.encode(&operation.payload)?;
        let clock = serde_json::to_string(&operation.clock)?;

        sqlx::query(
            "INSERT INTO operations (
                seq, op_id, kind, collection, entity, payload, clock,
                enqueued_at, retries, next_attempt_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(seq)
        .bind(&operation.id)
        .bind(operation.kind.as_str())
        .bind(&operation.collection)
        .bind(&operation.entity)
        .bind(payload)
        .bind(clock)
        .bind(to_sql(operation.enqueued_at))
        .bind(i64::from(operation.retries))
        .bind(to_sql(operation.next_attempt_at))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Drop the oldest operations beyond capacity, never `keep`.
    async fn trim_to_capacity(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        keep: &str,
    ) -> Result<Vec<SyncOperation>> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM operations")
            .fetch_one(&mut **tx)
            .await?;
        let excess = (count as usize).saturating_sub(self.capacity);
        if excess == 0 {
            return Ok(Vec::new());
        }

        let query = format!("{} WHERE op_id != ? ORDER BY seq LIMIT ?", SELECT_OPERATIONS);
        let stored = sqlx::query_as::<_, StoredOperation>(&query)
            .bind(keep)
            .bind(excess as i64)
            .fetch_all(&mut **tx)
            .await?;

        let mut dropped = Vec::with_capacity(stored.len());
        for stored in stored {
            let operation = stored.into_operation(self.codec.as_ref())?;
            self.delete(tx, &operation.id).await?;
            dropped.push(operation);
        }
        Ok(dropped)
    }

    /// The operation and its queue position.
    async fn fetch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        op_id: &str,
    ) -> Result<(i64, SyncOperation)> {
        let query = format!("{} WHERE op_id = ?", SELECT_OPERATIONS);
        let stored = sqlx::query_as::<_, StoredOperation>(&query)
            .bind(op_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| SyncError::OperationNotFound(op_id.to_string()))?;
        let seq = stored.seq;
        Ok((seq, stored.into_operation(self.codec.as_ref())?))
    }

    async fn delete(&self, tx: &mut Transaction<'_, Sqlite>, op_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM operations WHERE op_id = ?")
            .bind(op_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn append_failed(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        seq: i64,
        operation: SyncOperation,
        reason: &str,
        now: Timestamp,
    ) -> Result<FailedOperation> {
        let failed = FailedOperation {
            operation,
            reason: reason.to_string(),
            failed_at: now,
            requeued_at: None,
        };

        sqlx::query(
            "INSERT INTO failed_operations (op_id, seq, operation, reason, failed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&failed.operation.id)
        .bind(seq)
        .bind(encode(self.codec.as_ref(), &failed)?)
        .bind(reason)
        .bind(to_sql(now))
        .execute(&mut **tx)
        .await?;

        Ok(failed)
    }
}

fn log_dropped(dropped: &[SyncOperation]) {
    for operation in dropped {
        tracing::warn!(
            op_id = %operation.id,
            entity = %operation.entity,
            "Queue over capacity, oldest operation dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, run_migrations};
    use ferry_engine::{JsonCodec, RETRY_CEILING};
    use serde_json::json;
    use std::time::Duration;

    async fn queue(capacity: usize) -> SyncQueue {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        SyncQueue::new(
            pool,
            Arc::new(JsonCodec),
            capacity,
            Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
        )
    }

    fn draft(entity: &str, n: u64) -> NewOperation {
        NewOperation {
            kind: OperationKind::Update,
            collection: "rooms".into(),
            entity: entity.into(),
            payload: json!({"n": n}),
            clock: VectorClock::from_iter([("a", n)]),
        }
    }

    #[tokio::test]
    async fn enqueue_assigns_identity() {
        let queue = queue(10).await;
        let first = queue.enqueue(draft("room-1", 1), 5).await.unwrap().operation;
        let second = queue.enqueue(draft("room-1", 2), 6).await.unwrap().operation;

        assert_ne!(first.id, second.id);
        assert_eq!(first.retries, 0);
        assert_eq!(first.enqueued_at, 5);
        assert_eq!(queue.get(&first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn invalid_drafts_are_rejected() {
        let queue = queue(10).await;
        let mut bad = draft("room-1", 1);
        bad.clock = VectorClock::new();

        assert!(matches!(
            queue.enqueue(bad, 0).await,
            Err(SyncError::Engine(ferry_engine::Error::InvalidOperation(_)))
        ));
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn fail_backs_off_then_parks() {
        let queue = queue(10).await;
        let op = queue.enqueue(draft("room-1", 1), 0).await.unwrap().operation;

        for attempt in 1..=RETRY_CEILING {
            match queue.fail(&op.id, "503", 1_000).await.unwrap() {
                FailOutcome::Retrying { operation, next_attempt_at } => {
                    assert_eq!(operation.retries, attempt);
                    assert_eq!(next_attempt_at, 1_000 + 100 * (1 << (attempt - 1)));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        match queue.fail(&op.id, "503", 2_000).await.unwrap() {
            FailOutcome::Parked(failed) => {
                assert_eq!(failed.operation.retries, RETRY_CEILING + 1);
                assert_eq!(failed.reason, "503");
                assert_eq!(failed.failed_at, 2_000);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(queue.is_empty().await.unwrap());
        assert_eq!(queue.failed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ack_of_unknown_operation_fails() {
        let queue = queue(10).await;
        assert!(matches!(
            queue.ack("missing").await,
            Err(SyncError::OperationNotFound(id)) if id == "missing"
        ));
    }
}
