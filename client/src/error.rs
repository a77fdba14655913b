//! Unified error handling for the client.

use crate::remote::RemoteError;
use ferry_engine::OperationId;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] ferry_engine::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Conflict not found: {0}")]
    ConflictNotFound(i64),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("Sync cycle already in progress")]
    CycleInProgress,

    #[error("Device is offline")]
    Offline,
}

impl SyncError {
    pub(crate) fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        SyncError::Corrupt {
            table,
            reason: reason.into(),
        }
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, SyncError>;
