//! Operation types for expressing queued changes.
//!
//! Local mutations are not sent as direct writes. Each one becomes a
//! [`SyncOperation`] that waits in the durable queue until the backend
//! acknowledges it, carrying the clock of the record version it produced.

use crate::{
    error::Result, CollectionName, Error, OperationId, RecordId, ReplicatedRecord, Timestamp,
    VectorClock,
};
use serde::{Deserialize, Serialize};

/// Failures tolerated before an operation is parked in the failed log.
pub const RETRY_CEILING: u32 = 3;

/// What an operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Stable lowercase name, used as the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Parse the storage representation.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(Error::InvalidOperation(format!(
                "unknown operation kind: {}",
                other
            ))),
        }
    }
}

/// An operation before the queue has assigned it an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOperation {
    pub kind: OperationKind,
    pub collection: CollectionName,
    pub entity: RecordId,
    pub payload: serde_json::Value,
    /// Clock of the record version this operation produces
    pub clock: VectorClock,
}

impl NewOperation {
    /// Describe the write that turned an entity into `record`.
    pub fn from_record(kind: OperationKind, record: &ReplicatedRecord) -> Self {
        Self {
            kind,
            collection: record.collection.clone(),
            entity: record.id.clone(),
            payload: record.payload.clone(),
            clock: record.clock.clone(),
        }
    }

    /// Reject drafts the backend could never accept.
    pub fn validate(&self) -> Result<()> {
        if self.entity.is_empty() {
            return Err(Error::InvalidOperation("empty entity id".into()));
        }
        if self.collection.is_empty() {
            return Err(Error::InvalidOperation("empty collection".into()));
        }
        if self.clock.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "operation on '{}' carries an empty clock",
                self.entity
            )));
        }
        Ok(())
    }

    /// Give the draft its identity. Retry count starts at zero.
    pub fn into_operation(
        self,
        id: impl Into<OperationId>,
        enqueued_at: Timestamp,
    ) -> SyncOperation {
        SyncOperation {
            id: id.into(),
            kind: self.kind,
            collection: self.collection,
            entity: self.entity,
            payload: self.payload,
            clock: self.clock,
            enqueued_at,
            retries: 0,
            next_attempt_at: enqueued_at,
        }
    }
}

/// A pending mutation awaiting transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Operation identity (distinct from the entity id)
    pub id: OperationId,
    pub kind: OperationKind,
    pub collection: CollectionName,
    /// Target entity
    pub entity: RecordId,
    pub payload: serde_json::Value,
    /// Clock of the record version this operation produces
    pub clock: VectorClock,
    pub enqueued_at: Timestamp,
    /// Failed attempts so far
    pub retries: u32,
    /// Earliest time the next attempt may start
    pub next_attempt_at: Timestamp,
}

impl SyncOperation {
    /// The record state this operation leaves behind once applied.
    pub fn to_record(&self) -> ReplicatedRecord {
        ReplicatedRecord {
            id: self.entity.clone(),
            collection: self.collection.clone(),
            clock: self.clock.clone(),
            payload: self.payload.clone(),
            tombstone: self.kind == OperationKind::Delete,
        }
    }

    /// True once another failure would exceed the retry ceiling.
    pub fn is_exhausted(&self) -> bool {
        self.retries > RETRY_CEILING
    }

    /// Whether the operation may be attempted at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_attempt_at <= now
    }
}

/// An operation removed from the live queue for manual intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    pub operation: SyncOperation,
    /// Last error reported for the operation
    pub reason: String,
    pub failed_at: Timestamp,
    /// Set when the operation was put back on the live queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeued_at: Option<Timestamp>,
}
