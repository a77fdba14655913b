//! # Ferry Engine
//!
//! Deterministic building blocks for offline-first synchronization.
//!
//! This crate holds the pure part of the sync system: the replicated data
//! model, causal ordering, conflict resolution and the admission/backoff
//! policies. Durable storage, the remote transport and the sync actor live
//! in `ferry-client`; everything here is plain data in, plain data out.
//!
//! ## Design Principles
//!
//! - **No IO**: no files, sockets, timers or threads
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Pure merges**: every conflict outcome is a function of two records
//!
//! ## Core Concepts
//!
//! ### Vector clocks
//!
//! A [`VectorClock`] maps replica ids to counters. Comparing two clocks yields
//! a [`ClockOrdering`]: equal, dominates, dominated or concurrent. Concurrent
//! clocks are the conflict signal.
//!
//! ### Replicated records
//!
//! A [`ReplicatedRecord`] is one logical entity: id, collection, clock,
//! JSON payload and a tombstone flag. Deletion is a clock-bearing write, so
//! delete-vs-update races are compared causally instead of losing the delete.
//!
//! ### Operations
//!
//! Local mutations travel to the backend as [`SyncOperation`]s carrying the
//! clock of the record state they produce.
//!
//! ### Conflict resolution
//!
//! The [`ConflictResolver`] picks a [`Strategy`] per collection:
//! - [`Strategy::LastWriteWins`] - higher local-replica counter wins (default)
//! - [`Strategy::FirstWriteWins`] - lower local-replica counter wins
//! - [`Strategy::Merge`] - caller-supplied payload join, clocks joined
//! - [`Strategy::Manual`] - deferred, both versions kept for later
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{ClockOrdering, ConflictResolver, ReplicatedRecord, VectorClock};
//! use serde_json::json;
//!
//! let local = ReplicatedRecord::new(
//!     "room-1",
//!     "rooms",
//!     json!({"title": "Kitchen"}),
//!     VectorClock::from_iter([("device-a", 2)]),
//! );
//! let remote = ReplicatedRecord::new(
//!     "room-1",
//!     "rooms",
//!     json!({"title": "Lounge"}),
//!     VectorClock::from_iter([("device-a", 1), ("device-b", 1)]),
//! );
//!
//! assert_eq!(local.clock.compare(&remote.clock), ClockOrdering::Concurrent);
//!
//! let resolver = ConflictResolver::new("device-a");
//! let outcome = resolver.reconcile(Some(&local), remote);
//! assert!(outcome.record_to_store().is_none()); // last-write-wins keeps local
//! ```

pub mod admission;
pub mod backoff;
pub mod clock;
pub mod codec;
pub mod error;
pub mod operation;
pub mod record;
pub mod resolve;

// Re-export main types at crate root
pub use admission::{AdmissionPolicy, CacheEntryMeta};
pub use backoff::Backoff;
pub use clock::{ClockOrdering, VectorClock};
pub use codec::{JsonCodec, PayloadCodec};
pub use error::Error;
pub use operation::{
    FailedOperation, NewOperation, OperationKind, SyncOperation, RETRY_CEILING,
};
pub use record::ReplicatedRecord;
pub use resolve::{
    Conflict, ConflictResolution, ConflictResolver, MergeFn, MergeOutcome, Strategy,
};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type ReplicaId = String;
pub type OperationId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
