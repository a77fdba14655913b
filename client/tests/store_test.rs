//! LocalStore durability and cache admission.

use ferry_client::{create_memory_pool, create_pool, run_migrations, LocalStore, SyncError};
use ferry_engine::{JsonCodec, ReplicatedRecord, VectorClock};
use serde_json::json;
use std::sync::Arc;

async fn memory_store(budget: u64) -> LocalStore {
    let pool = create_memory_pool().await.unwrap();
    run_migrations(&pool).await.unwrap();
    LocalStore::open(pool, Arc::new(JsonCodec), budget).await.unwrap()
}

fn room(id: &str, title: &str, clock: &[(&str, u64)]) -> ReplicatedRecord {
    ReplicatedRecord::new(
        id,
        "rooms",
        json!({"title": title, "tags": ["a", "b"], "area": 12.5}),
        clock.iter().map(|(r, c)| (r.to_string(), *c)).collect(),
    )
}

#[tokio::test]
async fn put_then_get_returns_an_equal_record() {
    let store = memory_store(1024).await;
    let record = room("room-1", "Kitchen", &[("a", 2), ("b", 1)]);

    store.put(&record, 1).await.unwrap();
    assert_eq!(store.get("room-1"), Some(record.clone()));

    let updated = record.write("a", json!({"title": "Lounge"}));
    store.put(&updated, 2).await.unwrap();
    assert_eq!(store.get("room-1"), Some(updated));
    assert_eq!(store.record_count(), 1);
}

#[tokio::test]
async fn least_recently_used_entry_is_evicted_first() {
    let n = 1_000;
    let store = memory_store(n).await;

    assert!(store.cache_put("A", b"a", n / 2).await.unwrap().is_empty());
    assert!(store.cache_put("B", b"b", n / 2).await.unwrap().is_empty());
    store.cache_get("B").await.unwrap();

    let evicted = store.cache_put("C", b"c", n / 2).await.unwrap();
    assert_eq!(evicted, vec!["A".to_string()]);
    assert_eq!(store.cache_get("A").await.unwrap(), None);
    assert_eq!(store.cache_get("B").await.unwrap(), Some(b"b".to_vec()));
    assert_eq!(store.cache_size().await.unwrap(), n);
}

#[tokio::test]
async fn reading_an_entry_protects_it() {
    let n = 1_000;
    let store = memory_store(n).await;

    store.cache_put("A", b"a", n / 2).await.unwrap();
    store.cache_put("B", b"b", n / 2).await.unwrap();
    store.cache_get("A").await.unwrap();

    let evicted = store.cache_put("C", b"c", n / 2).await.unwrap();
    assert_eq!(evicted, vec!["B".to_string()]);
}

#[tokio::test]
async fn oversized_entry_is_still_admitted() {
    let store = memory_store(100).await;
    store.cache_put("small", b"s", 40).await.unwrap();

    let evicted = store.cache_put("huge", b"h", 150).await.unwrap();
    assert_eq!(evicted, vec!["small".to_string()]);
    assert_eq!(store.cache_get("huge").await.unwrap(), Some(b"h".to_vec()));
    assert_eq!(store.cache_size().await.unwrap(), 150);
}

#[tokio::test]
async fn rewriting_a_key_does_not_evict_it() {
    let store = memory_store(100).await;
    store.cache_put("a", b"1", 60).await.unwrap();

    let evicted = store.cache_put("a", b"2", 90).await.unwrap();
    assert!(evicted.is_empty());
    assert_eq!(store.cache_get("a").await.unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.cache_size().await.unwrap(), 90);
}

#[tokio::test]
async fn records_and_cache_are_separate_namespaces() {
    let store = memory_store(10).await;
    let record = room("shared", "Kitchen", &[("a", 1)]);
    store.put(&record, 1).await.unwrap();

    store.cache_put("shared", b"blob", 10).await.unwrap();
    store.cache_put("other", b"blob", 10).await.unwrap();

    assert_eq!(store.get("shared"), Some(record));
    assert_eq!(store.cache_get("shared").await.unwrap(), None);
}

#[tokio::test]
async fn state_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ferry.db");
    let path = path.to_str().unwrap();
    let record = room("room-1", "Kitchen", &[("a", 3)]).delete("a");

    {
        let pool = create_pool(path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = LocalStore::open(pool.clone(), Arc::new(JsonCodec), 1024).await.unwrap();
        store.put(&record, 1).await.unwrap();
        store.cache_put("thumb", b"png", 3).await.unwrap();
        pool.close().await;
    }

    let pool = create_pool(path).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store = LocalStore::open(pool, Arc::new(JsonCodec), 1024).await.unwrap();

    assert_eq!(store.get("room-1"), Some(record));
    assert_eq!(store.get_active("room-1"), None);
    assert_eq!(store.cache_get("thumb").await.unwrap(), Some(b"png".to_vec()));
    assert_eq!(
        store.get("room-1").unwrap().clock,
        VectorClock::from_iter([("a", 4)])
    );
}

#[tokio::test]
async fn failed_write_leaves_the_previous_record_visible() {
    let pool = create_memory_pool().await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store = LocalStore::open(pool.clone(), Arc::new(JsonCodec), 1024).await.unwrap();
    let record = room("room-1", "Kitchen", &[("a", 1)]);
    store.put(&record, 1).await.unwrap();

    pool.close().await;
    let updated = record.write("a", json!({"title": "Lounge"}));
    assert!(matches!(
        store.put(&updated, 2).await,
        Err(SyncError::Storage(_))
    ));
    assert_eq!(store.get("room-1"), Some(record));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cache_writers_share_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let pool = create_pool(path.to_str().unwrap()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store = LocalStore::open(pool, Arc::new(JsonCodec), 500).await.unwrap();

    let writers: Vec<_> = (0..8)
        .map(|writer| {
            let store = store.clone();
            tokio::spawn(async move {
                for n in 0..25 {
                    let key = format!("{}-{}", writer, n);
                    store.cache_put(&key, b"blob", 10).await?;
                    store.cache_get(&key).await?;
                }
                Ok::<_, SyncError>(())
            })
        })
        .collect();

    for writer in writers {
        writer.await.unwrap().unwrap();
    }
    assert_eq!(store.cache_size().await.unwrap(), 500);
}
