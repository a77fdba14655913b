//! Shared fixtures: a scripted backend and an engine wired to it.

#![allow(dead_code)]

use async_trait::async_trait;
use ferry_client::{
    create_memory_pool, run_migrations, ManualScheduler, Pool, ReachabilityMonitor, RemoteApi,
    RemoteError, SyncConfig, SyncContext, SyncContextBuilder, SyncEngine,
};
use ferry_engine::{Backoff, ReplicatedRecord, SyncOperation, Timestamp};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// 2024-02-01T00:00:00Z
pub const START: Timestamp = 1_706_745_600_000;

/// In-process backend with scripted responses.
///
/// Sends succeed unless a failure was queued with [`fail_next_send`].
#[derive(Default)]
pub struct MockRemote {
    sent: Mutex<Vec<SyncOperation>>,
    send_results: Mutex<VecDeque<Result<(), RemoteError>>>,
    changes: Mutex<Vec<ReplicatedRecord>>,
    fetch_errors: Mutex<VecDeque<RemoteError>>,
    fetched_since: Mutex<Vec<Timestamp>>,
    hang_sends: AtomicBool,
    send_started: Notify,
    release: Notify,
}

impl MockRemote {
    pub fn fail_next_send(&self, error: RemoteError) {
        self.send_results.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_next_fetch(&self, error: RemoteError) {
        self.fetch_errors.lock().unwrap().push_back(error);
    }

    /// Records returned by every subsequent fetch.
    pub fn set_changes(&self, changes: Vec<ReplicatedRecord>) {
        *self.changes.lock().unwrap() = changes;
    }

    /// Make sends block until the caller gives up on them or they are
    /// released.
    pub fn hang_sends(&self, hang: bool) {
        self.hang_sends.store(hang, Ordering::SeqCst);
    }

    /// Let the send currently blocked by [`hang_sends`] complete, and stop
    /// blocking later ones.
    pub fn release_sends(&self) {
        self.hang_sends.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub async fn wait_for_send(&self) {
        self.send_started.notified().await;
    }

    /// Every send attempt, in order.
    pub fn sent(&self) -> Vec<SyncOperation> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fetched_since(&self) -> Vec<Timestamp> {
        self.fetched_since.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn send(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        self.sent.lock().unwrap().push(operation.clone());
        self.send_started.notify_one();

        if self.hang_sends.load(Ordering::SeqCst) {
            self.release.notified().await;
        }

        self.send_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn fetch_changes_since(
        &self,
        since: Timestamp,
    ) -> Result<Vec<ReplicatedRecord>, RemoteError> {
        self.fetched_since.lock().unwrap().push(since);

        if let Some(error) = self.fetch_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.changes.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub remote: Arc<MockRemote>,
    pub monitor: ReachabilityMonitor,
    pub scheduler: Arc<ManualScheduler>,
    pub pool: Pool,
}

impl Harness {
    pub fn me(&self) -> String {
        self.engine.replica_id().to_string()
    }

    pub async fn queue_len(&self) -> usize {
        self.engine.context().queue.len().await.unwrap()
    }
}

/// Backoff of 100ms doubling up to 1s; periodic ticks effectively off.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_sync_interval(Duration::from_secs(3600))
        .with_backoff(Backoff::new(Duration::from_millis(100), Duration::from_secs(1)))
}

pub async fn harness() -> Harness {
    harness_with(|builder| builder).await
}

pub async fn harness_with<F>(customize: F) -> Harness
where
    F: FnOnce(SyncContextBuilder) -> SyncContextBuilder,
{
    let pool = create_memory_pool().await.unwrap();
    run_migrations(&pool).await.unwrap();

    let remote = Arc::new(MockRemote::default());
    let scheduler = Arc::new(ManualScheduler::new(START));

    let builder = SyncContext::builder(pool.clone(), remote.clone())
        .config(test_config())
        .scheduler(scheduler.clone());
    let ctx = customize(builder).build().await.unwrap();

    let monitor = ReachabilityMonitor::new();
    let engine = Arc::new(SyncEngine::new(ctx, monitor.subscribe()));

    Harness {
        engine,
        remote,
        monitor,
        scheduler,
        pool,
    }
}
