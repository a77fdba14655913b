//! Notifications the sync engine publishes to the application.

use ferry_engine::{Conflict, FailedOperation, OperationId, RecordId, SyncOperation, Timestamp};

/// Phase of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
    Pulling,
}

/// Something the application may want to react to.
///
/// Rejections and deferred conflicts need user or operator attention; the
/// rest is informational.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged(EngineState),
    OperationAcked {
        op_id: OperationId,
        entity: RecordId,
    },
    OperationRetrying {
        op_id: OperationId,
        retries: u32,
        next_attempt_at: Timestamp,
        reason: String,
    },
    /// Retry ceiling exceeded
    OperationFailed(FailedOperation),
    /// The backend refused the operation outright
    OperationRejected(FailedOperation),
    /// Oldest operations lost to the queue's capacity bound
    OperationsDropped(Vec<SyncOperation>),
    ConflictDeferred {
        conflict_id: i64,
        conflict: Conflict,
    },
    PullCompleted {
        received: usize,
        applied: usize,
    },
    PullFailed {
        reason: String,
    },
}
