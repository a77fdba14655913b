//! Edge case tests for ferry-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use ferry_engine::{
    AdmissionPolicy, Backoff, CacheEntryMeta, ClockOrdering, ConflictResolver, JsonCodec,
    MergeOutcome, NewOperation, OperationKind, PayloadCodec, ReplicatedRecord, Strategy,
    VectorClock,
};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Replica id edge cases
// ============================================================================

#[test]
fn unicode_replica_ids() {
    let ids = ["デバイス", "устройство", "🎉📱", "a b\tc", "Null\0Test"];

    let mut clock = VectorClock::new();
    for id in ids {
        clock = clock.increment(id);
    }

    for id in ids {
        assert_eq!(clock.get(id), 1, "missing counter for {:?}", id);
    }

    let json = serde_json::to_string(&clock).unwrap();
    let parsed: VectorClock = serde_json::from_str(&json).unwrap();
    assert_eq!(clock, parsed);
}

#[test]
fn empty_replica_id_is_just_another_key() {
    let clock = VectorClock::new().increment("");
    assert_eq!(clock.get(""), 1);
    assert_eq!(clock.compare(&VectorClock::new()), ClockOrdering::Dominates);
}

// ============================================================================
// Counter edge cases
// ============================================================================

#[test]
fn large_counters_compare_correctly() {
    let a: VectorClock = [("a", u64::MAX - 1)].into_iter().collect();
    let b = a.increment("a");
    assert_eq!(b.get("a"), u64::MAX);
    assert_eq!(b.compare(&a), ClockOrdering::Dominates);
}

#[test]
fn many_replicas() {
    let mut local = VectorClock::new();
    let mut remote = VectorClock::new();
    for i in 0..500 {
        local = local.increment(&format!("replica-{}", i));
        remote = remote.increment(&format!("replica-{}", i));
    }
    assert_eq!(local.compare(&remote), ClockOrdering::Equal);

    let local = local.increment("replica-0");
    let remote = remote.increment("replica-499");
    assert_eq!(local.compare(&remote), ClockOrdering::Concurrent);
}

// ============================================================================
// Record edge cases
// ============================================================================

#[test]
fn delete_then_recreate_keeps_history() {
    let clock = VectorClock::new().increment("a");
    let record = ReplicatedRecord::new("r", "c", json!({"v": 1}), clock);
    let deleted = record.delete("a");
    let revived = deleted.write("a", json!({"v": 2}));

    assert!(revived.is_active());
    assert_eq!(revived.clock.get("a"), 3);
    assert_eq!(revived.compare(&deleted), ClockOrdering::Dominates);
}

#[test]
fn delete_versus_concurrent_update_is_detected() {
    let base = ReplicatedRecord::new("r", "c", json!({"v": 1}), VectorClock::new().increment("a"));
    let deleted_here = base.delete("a");
    let updated_there = base.write("b", json!({"v": 2}));

    assert_eq!(
        deleted_here.compare(&updated_there),
        ClockOrdering::Concurrent
    );

    // default strategy: our delete has the higher local counter, it stays
    let resolver = ConflictResolver::new("a");
    let outcome = resolver.reconcile(Some(&deleted_here), updated_there);
    assert!(matches!(outcome, MergeOutcome::Resolved { .. }));
    assert!(outcome.record_to_store().is_none());
}

#[test]
fn null_and_nested_payloads() {
    let codec = JsonCodec;
    for payload in [
        json!(null),
        json!({}),
        json!([]),
        json!({"deep": {"deeper": {"deepest": [1, 2, {"x": null}]}}}),
        json!("just a string"),
    ] {
        let bytes = codec.encode(&payload).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), payload);
    }
}

#[test]
fn merge_of_two_deletes_stays_deleted() {
    let resolver = ConflictResolver::new("a").with_default(Strategy::merge(|l, _| l.clone()));
    let base = ReplicatedRecord::new("r", "c", json!({"v": 1}), VectorClock::new());
    let local = base.delete("a");
    let remote = base.delete("b");

    let outcome = resolver.reconcile(Some(&local), remote);
    let stored = outcome.record_to_store().unwrap();
    assert!(stored.tombstone);
    assert_eq!(
        stored.clock,
        [("a", 2), ("b", 1)].into_iter().collect::<VectorClock>()
    );
}

// ============================================================================
// Operation edge cases
// ============================================================================

#[test]
fn operation_from_record_carries_clock() {
    let clock = VectorClock::new().increment("a");
    let record = ReplicatedRecord::new("r", "c", json!({"v": 1}), clock);
    let op = NewOperation::from_record(OperationKind::Create, &record).into_operation("op", 5);
    assert_eq!(op.to_record(), record);
}

// ============================================================================
// Policy edge cases
// ============================================================================

#[test]
fn zero_budget_evicts_everything() {
    let policy = AdmissionPolicy::new(0);
    let resident = vec![CacheEntryMeta {
        key: "a".into(),
        size_bytes: 1,
        last_access: 1,
    }];
    assert_eq!(policy.plan(&resident, "b", 0), vec!["a".to_string()]);
}

#[test]
fn empty_cache_never_plans_eviction() {
    let policy = AdmissionPolicy::new(10);
    assert!(policy.plan(&[], "a", 1_000).is_empty());
}

#[test]
fn backoff_huge_retry_counts_do_not_overflow() {
    let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
    assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(30));
    assert_eq!(backoff.delay_millis(u32::MAX), 30_000);
}
