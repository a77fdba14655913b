//! Error types for the Ferry engine.

use thiserror::Error;

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("codec '{codec}' failed: {reason}")]
    Codec { codec: &'static str, reason: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
