//! The sync actor: drains the queue, pulls remote changes, merges them.
//!
//! # Cycle
//!
//! 1. `Idle -> Draining` when reachable and the queue holds work
//! 2. `Draining -> Pulling` once no operation is due any more
//! 3. `Pulling -> Idle` after the remote batch has been merged
//!
//! Losing reachability aborts the cycle from any state. The operation in
//! flight stays queued with its retry count untouched, and the last-pull
//! mark does not advance.
//!
//! At most one cycle runs at a time. Application writes and reads go
//! straight to the store and queue and never wait for a cycle, only for the
//! single merge step currently being written.

use crate::context::SyncContext;
use crate::db::PendingConflict;
use crate::error::{Result, SyncError};
use crate::events::{EngineState, SyncEvent};
use crate::queue::{Enqueued, FailOutcome};
use crate::reachability::Reachability;
use crate::remote::RemoteError;
use ferry_engine::{
    ConflictResolution, FailedOperation, MergeOutcome, NewOperation, OperationKind,
    ReplicatedRecord, SyncOperation, Timestamp,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 256;

/// Counters for one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub acked: usize,
    pub retried: usize,
    /// Moved to the failed log after exceeding the retry ceiling
    pub failed: usize,
    /// Refused by the backend and moved to the failed log
    pub rejected: usize,
    pub received: usize,
    pub inserted: usize,
    pub fast_forwarded: usize,
    pub resolved: usize,
    pub deferred: usize,
    pub pull_error: Option<String>,
    /// Reachability was lost before the cycle finished
    pub aborted: bool,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        *self == CycleReport::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Aborted,
}

/// Offline-first sync engine over an explicit [`SyncContext`].
pub struct SyncEngine {
    ctx: SyncContext,
    in_progress: AtomicBool,
    state: watch::Sender<EngineState>,
    events: broadcast::Sender<SyncEvent>,
    trigger: Notify,
    reachability: watch::Receiver<Reachability>,
    // Serializes read-modify-write of a record between local mutations and
    // remote merges.
    writes: Mutex<()>,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext, reachability: watch::Receiver<Reachability>) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ctx,
            in_progress: AtomicBool::new(false),
            state,
            events,
            trigger: Notify::new(),
            reachability,
            writes: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn replica_id(&self) -> &str {
        &self.ctx.replica_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.reachability.borrow().is_online()
    }

    /// Live record by id.
    pub fn get(&self, id: &str) -> Option<ReplicatedRecord> {
        self.ctx.store.get_active(id)
    }

    /// Live records of a collection.
    pub fn list(&self, collection: &str) -> Vec<ReplicatedRecord> {
        self.ctx.store.list(collection)
    }

    pub async fn create(
        &self,
        collection: &str,
        entity: &str,
        payload: serde_json::Value,
    ) -> Result<SyncOperation> {
        self.enqueue(OperationKind::Create, collection, entity, payload).await
    }

    pub async fn update(
        &self,
        collection: &str,
        entity: &str,
        payload: serde_json::Value,
    ) -> Result<SyncOperation> {
        self.enqueue(OperationKind::Update, collection, entity, payload).await
    }

    /// Tombstone an entity. The last payload travels with the delete.
    pub async fn delete(&self, collection: &str, entity: &str) -> Result<SyncOperation> {
        let payload = self
            .ctx
            .store
            .get(entity)
            .map(|record| record.payload)
            .unwrap_or(serde_json::Value::Null);
        self.enqueue(OperationKind::Delete, collection, entity, payload).await
    }

    /// Record a local mutation.
    ///
    /// The entity's clock advances by one for this replica. The operation is
    /// queued first and the materialised record written second, so a crash
    /// in between is repaired by [`recover`](Self::recover).
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        collection: &str,
        entity: &str,
        payload: serde_json::Value,
    ) -> Result<SyncOperation> {
        let enqueued = {
            let _write = self.writes.lock().await;
            let now = self.ctx.scheduler.now();
            let base = self
                .ctx
                .store
                .get(entity)
                .map(|record| record.clock)
                .unwrap_or_default();

            let record = ReplicatedRecord {
                id: entity.to_string(),
                collection: collection.to_string(),
                clock: base.increment(&self.ctx.replica_id),
                payload,
                tombstone: kind == OperationKind::Delete,
            };

            let enqueued = self
                .ctx
                .queue
                .enqueue(NewOperation::from_record(kind, &record), now)
                .await?;
            self.ctx.store.put(&record, now).await?;
            enqueued
        };

        Ok(self.after_enqueue(enqueued))
    }

    /// Re-apply every queued operation whose clock is newer than the stored
    /// record. Returns the number of records repaired.
    pub async fn recover(&self) -> Result<usize> {
        let _write = self.writes.lock().await;
        let now = self.ctx.scheduler.now();

        let mut repaired = 0;
        for operation in self.ctx.queue.pending().await? {
            if self.apply_if_newer(&operation.to_record(), now).await? {
                repaired += 1;
            }
        }

        if repaired > 0 {
            tracing::info!(repaired, "Replayed queued operations into the store");
        }
        Ok(repaired)
    }

    /// Settle a parked conflict with a chosen payload and queue the result.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        payload: serde_json::Value,
    ) -> Result<SyncOperation> {
        let enqueued = {
            let _write = self.writes.lock().await;
            let now = self.ctx.scheduler.now();
            let pending = self.ctx.conflicts.get(conflict_id).await?;
            let current = self.ctx.store.get(&pending.conflict.entity);
            let record = pending
                .conflict
                .settle(current.as_ref(), &self.ctx.replica_id, payload);

            let enqueued = self
                .ctx
                .queue
                .enqueue(NewOperation::from_record(OperationKind::Update, &record), now)
                .await?;
            self.ctx.store.put(&record, now).await?;
            self.ctx.conflicts.remove(conflict_id).await?;

            tracing::info!(
                conflict_id,
                entity = %record.id,
                clock = %record.clock,
                "Conflict settled"
            );
            enqueued
        };

        Ok(self.after_enqueue(enqueued))
    }

    pub async fn pending_conflicts(&self) -> Result<Vec<PendingConflict>> {
        self.ctx.conflicts.list().await
    }

    pub async fn failed_operations(&self) -> Result<Vec<FailedOperation>> {
        self.ctx.queue.failed().await
    }

    /// Give a parked operation another chance.
    pub async fn requeue_failed(&self, op_id: &str) -> Result<SyncOperation> {
        let enqueued = self
            .ctx
            .queue
            .requeue_failed(op_id, self.ctx.scheduler.now())
            .await?;
        Ok(self.after_enqueue(enqueued))
    }

    /// Run one drain + pull cycle now.
    pub async fn sync_now(&self) -> Result<CycleReport> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let _guard = CycleGuard::acquire(self)?;
        self.run_cycle().await
    }

    /// Start the background loop.
    ///
    /// Cycles run on the periodic interval, after each local mutation while
    /// online, and on every offline-to-online transition.
    pub fn spawn(self: &Arc<Self>) -> SyncHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.run(shutdown_rx).await });
        SyncHandle { shutdown, task }
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.ctx.config.sync_interval;
        let mut reachability = self.reachability.clone();
        let mut watching_reachability = true;
        let mut tick = self.ctx.scheduler.sleep(interval);

        tracing::info!(interval = ?interval, "Sync loop started");
        self.run_triggered("startup").await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = &mut tick => {
                    tick = self.ctx.scheduler.sleep(interval);
                    self.run_triggered("interval").await;
                }
                _ = self.trigger.notified() => {
                    self.run_triggered("local change").await;
                }
                changed = reachability.changed(), if watching_reachability => {
                    if changed.is_err() {
                        watching_reachability = false;
                        continue;
                    }
                    let online = reachability.borrow_and_update().is_online();
                    if online {
                        self.run_triggered("reconnect").await;
                    }
                }
            }
        }

        tracing::info!("Sync loop stopped");
    }

    async fn run_triggered(&self, trigger: &'static str) {
        if !self.is_online() {
            tracing::debug!(trigger, "Offline, cycle skipped");
            return;
        }

        match self.sync_now().await {
            Ok(report) if report.aborted => {
                tracing::info!(trigger, ?report, "Sync cycle aborted")
            }
            Ok(report) if report.is_empty() => tracing::debug!(trigger, "Sync cycle idle"),
            Ok(report) => tracing::info!(trigger, ?report, "Sync cycle finished"),
            Err(SyncError::CycleInProgress) | Err(SyncError::Offline) => {}
            Err(e) => tracing::error!(trigger, error = %e, "Sync cycle failed"),
        }
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let started = self.ctx.scheduler.now();
        tracing::debug!(started, "Sync cycle started");

        if !self.ctx.queue.is_empty().await? {
            self.set_state(EngineState::Draining);
            if self.drain(started, &mut report).await? == Flow::Aborted {
                report.aborted = true;
                return Ok(report);
            }
        }

        self.set_state(EngineState::Pulling);
        if self.pull(&mut report).await? == Flow::Aborted {
            report.aborted = true;
        }
        Ok(report)
    }

    /// Send every operation due at `due_at`, batch by batch.
    ///
    /// A failed operation is not due again before its backoff elapses, which
    /// always lies after `due_at`, so each operation is attempted at most
    /// once per cycle.
    async fn drain(&self, due_at: Timestamp, report: &mut CycleReport) -> Result<Flow> {
        let batch_size = self.ctx.config.batch_size;

        loop {
            let batch = self.ctx.queue.drain(batch_size, due_at).await?;
            if batch.is_empty() {
                return Ok(Flow::Continue);
            }

            let mut backing_off: HashSet<String> = HashSet::new();
            for operation in batch {
                if backing_off.contains(&operation.entity) {
                    continue;
                }

                let result = match self.call(self.ctx.remote.send(&operation)).await {
                    Some(result) => result,
                    None => {
                        tracing::info!(op_id = %operation.id, "Reachability lost, drain aborted");
                        return Ok(Flow::Aborted);
                    }
                };

                match result {
                    Ok(()) => {
                        self.acknowledge(&operation).await?;
                        report.acked += 1;
                    }
                    Err(RemoteError::Retryable(reason)) => {
                        backing_off.insert(operation.entity.clone());
                        self.retry(&operation, &reason, report).await?;
                    }
                    Err(RemoteError::Fatal(reason)) => {
                        let now = self.ctx.scheduler.now();
                        let parked = self.ctx.queue.park(&operation.id, &reason, now).await;
                        if let Some(failed) = still_queued(&operation.id, parked)? {
                            report.rejected += 1;
                            self.emit(SyncEvent::OperationRejected(failed));
                        }
                    }
                }
            }
        }
    }

    async fn acknowledge(&self, operation: &SyncOperation) -> Result<()> {
        still_queued(&operation.id, self.ctx.queue.ack(&operation.id).await)?;
        {
            let _write = self.writes.lock().await;
            self.apply_if_newer(&operation.to_record(), self.ctx.scheduler.now())
                .await?;
        }
        self.emit(SyncEvent::OperationAcked {
            op_id: operation.id.clone(),
            entity: operation.entity.clone(),
        });
        Ok(())
    }

    async fn retry(
        &self,
        operation: &SyncOperation,
        reason: &str,
        report: &mut CycleReport,
    ) -> Result<()> {
        let now = self.ctx.scheduler.now();
        let outcome = self.ctx.queue.fail(&operation.id, reason, now).await;
        match still_queued(&operation.id, outcome)? {
            None => {}
            Some(FailOutcome::Retrying {
                operation,
                next_attempt_at,
            }) => {
                report.retried += 1;
                self.emit(SyncEvent::OperationRetrying {
                    op_id: operation.id,
                    retries: operation.retries,
                    next_attempt_at,
                    reason: reason.to_string(),
                });
            }
            Some(FailOutcome::Parked(failed)) => {
                report.failed += 1;
                self.emit(SyncEvent::OperationFailed(failed));
            }
        }
        Ok(())
    }

    async fn pull(&self, report: &mut CycleReport) -> Result<Flow> {
        let started = self.ctx.scheduler.now();
        let since = self.ctx.meta.last_pull().await?;

        let changes = match self.call(self.ctx.remote.fetch_changes_since(since)).await {
            None => {
                tracing::info!(since, "Reachability lost, pull aborted");
                return Ok(Flow::Aborted);
            }
            Some(Err(e)) => {
                tracing::warn!(since, error = %e, "Pull failed");
                report.pull_error = Some(e.to_string());
                self.emit(SyncEvent::PullFailed {
                    reason: e.to_string(),
                });
                return Ok(Flow::Continue);
            }
            Some(Ok(changes)) => changes,
        };

        report.received = changes.len();
        let mut applied = 0;
        for remote in changes {
            if !self.is_online() {
                tracing::info!(since, "Reachability lost, pull aborted");
                return Ok(Flow::Aborted);
            }
            if self.merge_remote(remote, report).await? {
                applied += 1;
            }
        }

        self.ctx.meta.set_last_pull(started).await?;
        tracing::debug!(since, received = report.received, applied, "Pull merged");
        self.emit(SyncEvent::PullCompleted {
            received: report.received,
            applied,
        });
        Ok(Flow::Continue)
    }

    /// Merge one remote record. Returns whether local state changed.
    async fn merge_remote(
        &self,
        remote: ReplicatedRecord,
        report: &mut CycleReport,
    ) -> Result<bool> {
        let _write = self.writes.lock().await;
        let now = self.ctx.scheduler.now();
        let local = self.ctx.store.get(&remote.id);
        let outcome = self.ctx.resolver.reconcile(local.as_ref(), remote);

        // The join is a new local event; queue it before the store write so
        // that recover() can replay it.
        if let MergeOutcome::Resolved {
            record,
            resolution: ConflictResolution::Merged,
        } = &outcome
        {
            let draft = NewOperation::from_record(OperationKind::Update, record);
            let enqueued = self.ctx.queue.enqueue(draft, now).await?;
            self.report_dropped(enqueued.dropped);
        }
        if let Some(record) = outcome.record_to_store() {
            self.ctx.store.put(record, now).await?;
        }

        match outcome {
            MergeOutcome::Inserted(_) => report.inserted += 1,
            MergeOutcome::FastForward(_) => report.fast_forwarded += 1,
            MergeOutcome::Unchanged => return Ok(false),
            MergeOutcome::Resolved { record, resolution } => {
                report.resolved += 1;
                tracing::debug!(
                    entity = %record.id,
                    ?resolution,
                    clock = %record.clock,
                    "Concurrent versions resolved"
                );
                if resolution == ConflictResolution::LocalWins {
                    return Ok(false);
                }
            }
            MergeOutcome::Deferred(conflict) => {
                let conflict_id = self.ctx.conflicts.add(&conflict, now).await?;
                report.deferred += 1;
                tracing::warn!(
                    conflict_id,
                    entity = %conflict.entity,
                    local = %conflict.local.clock,
                    remote = %conflict.remote.clock,
                    "Conflict deferred for manual resolution"
                );
                self.emit(SyncEvent::ConflictDeferred {
                    conflict_id,
                    conflict,
                });
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write `record` when it is causally newer than the stored one.
    async fn apply_if_newer(&self, record: &ReplicatedRecord, now: Timestamp) -> Result<bool> {
        let newer = match self.ctx.store.get(&record.id) {
            None => true,
            Some(current) => record.clock.dominates(&current.clock),
        };
        if newer {
            self.ctx.store.put(record, now).await?;
        }
        Ok(newer)
    }

    /// Await a remote call, bounded by the request timeout.
    ///
    /// Returns `None` if reachability is lost first; the call is dropped.
    async fn call<T>(
        &self,
        request: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> Option<std::result::Result<T, RemoteError>> {
        let mut reachability = self.reachability.clone();
        let timeout = self.ctx.config.request_timeout;

        tokio::select! {
            biased;
            _ = wait_offline(&mut reachability) => None,
            _ = self.ctx.scheduler.sleep(timeout) => {
                Some(Err(RemoteError::Retryable(format!("timed out after {:?}", timeout))))
            }
            result = request => Some(result),
        }
    }

    fn after_enqueue(&self, enqueued: Enqueued) -> SyncOperation {
        self.report_dropped(enqueued.dropped);
        if self.is_online() {
            self.trigger.notify_one();
        }
        enqueued.operation
    }

    fn report_dropped(&self, dropped: Vec<SyncOperation>) {
        if !dropped.is_empty() {
            self.emit(SyncEvent::OperationsDropped(dropped));
        }
    }

    fn set_state(&self, next: EngineState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            tracing::debug!(state = ?next, "Engine state changed");
            self.emit(SyncEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// `None` when the operation already left the queue, which happens when
/// overflow drops it while its send is in flight.
fn still_queued<T>(op_id: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SyncError::OperationNotFound(_)) => {
            tracing::info!(op_id, "Operation left the queue while in flight");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn wait_offline(reachability: &mut watch::Receiver<Reachability>) {
    if reachability
        .wait_for(|state| *state == Reachability::Offline)
        .await
        .is_err()
    {
        // Monitor gone: the last known state holds forever.
        std::future::pending::<()>().await;
    }
}

/// Holds the single-cycle flag; releasing it returns the engine to Idle.
struct CycleGuard<'a> {
    engine: &'a SyncEngine,
}

impl<'a> CycleGuard<'a> {
    fn acquire(engine: &'a SyncEngine) -> Result<Self> {
        engine
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::CycleInProgress)?;
        Ok(Self { engine })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.engine.set_state(EngineState::Idle);
        self.engine.in_progress.store(false, Ordering::Release);
    }
}

/// Handle to the background loop started by [`SyncEngine::spawn`].
///
/// Dropping the handle also stops the loop.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop after the current cycle and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Sync loop panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report() {
        assert!(CycleReport::default().is_empty());
        let report = CycleReport {
            aborted: true,
            ..Default::default()
        };
        assert!(!report.is_empty());
    }
}
