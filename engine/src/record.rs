//! Replicated record: one logical entity plus its causal history.

use crate::{ClockOrdering, CollectionName, RecordId, VectorClock};
use serde::{Deserialize, Serialize};

/// A single logical entity as seen by one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedRecord {
    /// Stable identity of the entity
    pub id: RecordId,
    /// Entity type; selects the conflict strategy
    pub collection: CollectionName,
    /// Causal history of this version
    pub clock: VectorClock,
    /// The actual data payload (JSON value)
    pub payload: serde_json::Value,
    /// Logical deletion marker
    #[serde(default)]
    pub tombstone: bool,
}

impl ReplicatedRecord {
    /// Create a live record.
    pub fn new(
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        clock: VectorClock,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            clock,
            payload,
            tombstone: false,
        }
    }

    /// Check if record is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.tombstone
    }

    /// A new version carrying `payload`, written by `replica`.
    pub fn write(&self, replica: &str, payload: serde_json::Value) -> Self {
        Self {
            id: self.id.clone(),
            collection: self.collection.clone(),
            clock: self.clock.increment(replica),
            payload,
            tombstone: false,
        }
    }

    /// A tombstoned version written by `replica`. The last payload is kept.
    pub fn delete(&self, replica: &str) -> Self {
        Self {
            id: self.id.clone(),
            collection: self.collection.clone(),
            clock: self.clock.increment(replica),
            payload: self.payload.clone(),
            tombstone: true,
        }
    }

    /// Causal relationship of this version to another version.
    pub fn compare(&self, other: &ReplicatedRecord) -> ClockOrdering {
        self.clock.compare(&other.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> ReplicatedRecord {
        ReplicatedRecord::new(
            "room-1",
            "rooms",
            json!({"title": "Kitchen"}),
            VectorClock::from_iter([("a", 1)]),
        )
    }

    #[test]
    fn create_record() {
        let record = room();
        assert_eq!(record.id, "room-1");
        assert_eq!(record.collection, "rooms");
        assert!(record.is_active());
    }

    #[test]
    fn write_advances_clock() {
        let record = room();
        let next = record.write("a", json!({"title": "Lounge"}));
        assert_eq!(next.payload, json!({"title": "Lounge"}));
        assert_eq!(next.clock.get("a"), 2);
        assert_eq!(next.compare(&record), ClockOrdering::Dominates);
    }

    #[test]
    fn delete_is_a_clock_bearing_write() {
        let record = room();
        let deleted = record.delete("b");
        assert!(deleted.tombstone);
        assert!(!deleted.is_active());
        assert_eq!(deleted.payload, record.payload);
        assert_eq!(deleted.compare(&record), ClockOrdering::Dominates);
    }

    #[test]
    fn serialization_roundtrip() {
        let record = room().delete("a");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"tombstone\":true"));
        let parsed: ReplicatedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn tombstone_defaults_to_false() {
        let parsed: ReplicatedRecord = serde_json::from_str(
            r#"{"id":"r","collection":"c","clock":{"a":1},"payload":null}"#,
        )
        .unwrap();
        assert!(parsed.is_active());
    }
}
