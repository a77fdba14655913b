//! The backend seen from the sync engine: an opaque request/response channel.

mod http;

pub use http::HttpRemote;

use async_trait::async_trait;
use ferry_engine::{ReplicatedRecord, SyncOperation, Timestamp};

/// Why a remote call did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Timeout, 5xx, lost connection: worth another attempt later
    #[error("retryable: {0}")]
    Retryable(String),

    /// The backend rejected the request itself
    #[error("fatal: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteError::Retryable(msg) | RemoteError::Fatal(msg) => msg,
        }
    }
}

/// Remote API collaborator.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Transmit one queued operation.
    async fn send(&self, operation: &SyncOperation) -> Result<(), RemoteError>;

    /// Records changed on the backend since `since` (ms since epoch).
    async fn fetch_changes_since(
        &self,
        since: Timestamp,
    ) -> Result<Vec<ReplicatedRecord>, RemoteError>;
}
