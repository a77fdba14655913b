//! Conflict resolution between a local record and a remote copy.
//!
//! # Algorithm
//!
//! 1. No local copy: the remote record is inserted as-is
//! 2. Compare clocks
//! 3. Remote dominates: fast-forward to the remote record
//! 4. Local dominates or clocks equal: nothing to do
//! 5. Concurrent: hand both versions to the collection's [`Strategy`]
//!
//! Every outcome is a pure function of the two records and the local
//! replica id.

use crate::{ClockOrdering, CollectionName, RecordId, ReplicaId, ReplicatedRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied payload join: `(local, remote) -> merged`.
pub type MergeFn =
    Arc<dyn Fn(&serde_json::Value, &serde_json::Value) -> serde_json::Value + Send + Sync>;

/// How concurrent versions of an entity are settled.
#[derive(Clone, Default)]
pub enum Strategy {
    /// Higher counter for the local replica wins, ties keep local (default)
    #[default]
    LastWriteWins,
    /// Lower counter for the local replica wins, ties keep local
    FirstWriteWins,
    /// Join the payloads with a pure function and the clocks component-wise
    Merge(MergeFn),
    /// Keep local, park both versions for out-of-band resolution
    Manual,
}

impl Strategy {
    /// Wrap a merge function.
    pub fn merge<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value, &serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        Strategy::Merge(Arc::new(f))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::LastWriteWins => "last-write-wins",
            Strategy::FirstWriteWins => "first-write-wins",
            Strategy::Merge(_) => "merge",
            Strategy::Manual => "manual",
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a concurrent conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    /// Local version kept
    LocalWins,
    /// Remote version stored
    RemoteWins,
    /// A joined version stored
    Merged,
}

/// Two concurrent versions of the same entity awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub entity: RecordId,
    pub collection: CollectionName,
    pub local: ReplicatedRecord,
    pub remote: ReplicatedRecord,
}

impl Conflict {
    /// Settle with a chosen payload.
    ///
    /// The clock joins the local copy as it stands now (it may have moved on
    /// since the conflict was parked) with the remote version, then records
    /// the settlement as a new local event.
    pub fn settle(
        &self,
        current: Option<&ReplicatedRecord>,
        replica: &str,
        payload: serde_json::Value,
    ) -> ReplicatedRecord {
        let local = current.unwrap_or(&self.local);
        ReplicatedRecord {
            id: self.entity.clone(),
            collection: self.collection.clone(),
            clock: local.clock.join(&self.remote.clock).increment(replica),
            payload,
            tombstone: false,
        }
    }
}

/// Result of reconciling one remote record against local state.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// No local copy existed
    Inserted(ReplicatedRecord),
    /// Remote version strictly newer
    FastForward(ReplicatedRecord),
    /// Local version equal or newer
    Unchanged,
    /// Concurrent versions settled by a strategy
    Resolved {
        record: ReplicatedRecord,
        resolution: ConflictResolution,
    },
    /// Concurrent versions parked for manual resolution
    Deferred(Conflict),
}

impl MergeOutcome {
    /// The record LocalStore must persist, if any.
    pub fn record_to_store(&self) -> Option<&ReplicatedRecord> {
        match self {
            MergeOutcome::Inserted(record) | MergeOutcome::FastForward(record) => Some(record),
            MergeOutcome::Resolved { record, resolution } => match resolution {
                ConflictResolution::LocalWins => None,
                ConflictResolution::RemoteWins | ConflictResolution::Merged => Some(record),
            },
            MergeOutcome::Unchanged | MergeOutcome::Deferred(_) => None,
        }
    }
}

/// Picks a strategy per collection and applies it.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    replica: ReplicaId,
    default: Strategy,
    by_collection: HashMap<CollectionName, Strategy>,
}

impl ConflictResolver {
    /// Create a resolver for the local replica with last-write-wins default.
    pub fn new(replica: impl Into<ReplicaId>) -> Self {
        Self {
            replica: replica.into(),
            default: Strategy::default(),
            by_collection: HashMap::new(),
        }
    }

    /// Replace the process-wide fallback strategy.
    pub fn with_default(mut self, strategy: Strategy) -> Self {
        self.default = strategy;
        self
    }

    /// Use `strategy` for one collection.
    pub fn with_strategy(
        mut self,
        collection: impl Into<CollectionName>,
        strategy: Strategy,
    ) -> Self {
        self.by_collection.insert(collection.into(), strategy);
        self
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    /// Strategy for a collection, falling back to the default.
    pub fn strategy_for(&self, collection: &str) -> &Strategy {
        self.by_collection.get(collection).unwrap_or(&self.default)
    }

    /// Reconcile a remote record against the local copy (if any).
    pub fn reconcile(
        &self,
        local: Option<&ReplicatedRecord>,
        remote: ReplicatedRecord,
    ) -> MergeOutcome {
        let Some(local) = local else {
            return MergeOutcome::Inserted(remote);
        };

        match local.compare(&remote) {
            ClockOrdering::Dominated => MergeOutcome::FastForward(remote),
            ClockOrdering::Dominates | ClockOrdering::Equal => MergeOutcome::Unchanged,
            ClockOrdering::Concurrent => self.resolve(local, remote),
        }
    }

    /// Settle two concurrent versions. Callers only reach this when the
    /// clocks are concurrent.
    pub fn resolve(&self, local: &ReplicatedRecord, remote: ReplicatedRecord) -> MergeOutcome {
        let local_counter = local.clock.get(&self.replica);
        let remote_counter = remote.clock.get(&self.replica);

        match self.strategy_for(&local.collection) {
            Strategy::LastWriteWins => pick(local, remote, remote_counter > local_counter),
            Strategy::FirstWriteWins => pick(local, remote, remote_counter < local_counter),
            Strategy::Merge(merge) => MergeOutcome::Resolved {
                record: self.join(local, &remote, merge.as_ref()),
                resolution: ConflictResolution::Merged,
            },
            Strategy::Manual => MergeOutcome::Deferred(Conflict {
                entity: local.id.clone(),
                collection: local.collection.clone(),
                local: local.clone(),
                remote,
            }),
        }
    }

    fn join(
        &self,
        local: &ReplicatedRecord,
        remote: &ReplicatedRecord,
        merge: &(dyn Fn(&serde_json::Value, &serde_json::Value) -> serde_json::Value + Send + Sync),
    ) -> ReplicatedRecord {
        // A live side beats a concurrent delete.
        let (payload, tombstone) = match (local.tombstone, remote.tombstone) {
            (false, false) => (merge(&local.payload, &remote.payload), false),
            (false, true) => (local.payload.clone(), false),
            (true, false) => (remote.payload.clone(), false),
            (true, true) => (local.payload.clone(), true),
        };

        ReplicatedRecord {
            id: local.id.clone(),
            collection: local.collection.clone(),
            clock: local.clock.join(&remote.clock).increment(&self.replica),
            payload,
            tombstone,
        }
    }
}

fn pick(local: &ReplicatedRecord, remote: ReplicatedRecord, remote_wins: bool) -> MergeOutcome {
    if remote_wins {
        MergeOutcome::Resolved {
            record: remote,
            resolution: ConflictResolution::RemoteWins,
        }
    } else {
        MergeOutcome::Resolved {
            record: local.clone(),
            resolution: ConflictResolution::LocalWins,
        }
    }
}
