//! Vector clock for causal ordering of record versions.
//!
//! Each replica owns one counter. A replica only ever increments its own
//! counter, counters never go down, and an absent replica reads as zero.

use crate::ReplicaId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Causal relationship between two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClockOrdering {
    /// Same counter for every replica
    Equal,
    /// Left side has seen everything the right side has, and more
    Dominates,
    /// Right side has seen everything the left side has, and more
    Dominated,
    /// Neither has seen all of the other's events (conflict)
    Concurrent,
}

impl ClockOrdering {
    /// The ordering seen from the other side of the comparison.
    pub fn reverse(self) -> Self {
        match self {
            ClockOrdering::Dominates => ClockOrdering::Dominated,
            ClockOrdering::Dominated => ClockOrdering::Dominates,
            other => other,
        }
    }
}

/// Per-replica counters.
///
/// Stored in a `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<ReplicaId, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a replica (zero when absent).
    pub fn get(&self, replica: &str) -> u64 {
        self.counters.get(replica).copied().unwrap_or(0)
    }

    /// Return a copy of this clock with `replica`'s counter bumped by one.
    pub fn increment(&self, replica: &str) -> Self {
        let mut next = self.clone();
        *next.counters.entry(replica.to_string()).or_insert(0) += 1;
        next
    }

    /// Component-wise maximum of two clocks.
    pub fn join(&self, other: &VectorClock) -> Self {
        let mut joined = self.clone();
        for (replica, &counter) in &other.counters {
            let slot = joined.counters.entry(replica.clone()).or_insert(0);
            *slot = (*slot).max(counter);
        }
        joined
    }

    /// Compare two clocks over the union of their replicas.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut ahead = false;
        let mut behind = false;

        for replica in self.counters.keys().chain(other.counters.keys()) {
            match self.get(replica).cmp(&other.get(replica)) {
                Ordering::Greater => ahead = true,
                Ordering::Less => behind = true,
                Ordering::Equal => {}
            }
            if ahead && behind {
                return ClockOrdering::Concurrent;
            }
        }

        match (ahead, behind) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Dominates,
            (false, true) => ClockOrdering::Dominated,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True when this clock strictly dominates `other`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Dominates
    }

    /// True when neither clock dominates the other and they differ.
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Replicas with a recorded counter.
    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaId> {
        self.counters.keys()
    }

    /// Sum of all counters; handy for "dominates by n" checks.
    pub fn total(&self) -> u64 {
        self.counters.values().sum()
    }

    /// True when no replica has a non-zero counter.
    pub fn is_empty(&self) -> bool {
        self.counters.values().all(|&c| c == 0)
    }
}

impl<R: Into<ReplicaId>> FromIterator<(R, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (R, u64)>>(iter: I) -> Self {
        let counters = iter
            .into_iter()
            .filter(|(_, counter)| *counter > 0)
            .map(|(replica, counter)| (replica.into(), counter))
            .collect();
        Self { counters }
    }
}

// Absent and zero counters are the same thing, so equality goes through compare.
impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == ClockOrdering::Equal
    }
}

impl Eq for VectorClock {}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare(other) {
            ClockOrdering::Equal => Some(Ordering::Equal),
            ClockOrdering::Dominates => Some(Ordering::Greater),
            ClockOrdering::Dominated => Some(Ordering::Less),
            ClockOrdering::Concurrent => None,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (replica, counter)) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", replica, counter)?;
        }
        write!(f, "}}")
    }
}
