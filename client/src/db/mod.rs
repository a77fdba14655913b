//! Database module for durable sync state.

mod conflicts;
mod meta;
mod pool;

pub use conflicts::{ConflictLog, PendingConflict};
pub use meta::SyncMeta;
pub use pool::{create_memory_pool, create_pool, run_migrations, Pool};
pub(crate) use pool::begin_write;

use crate::error::Result;
use ferry_engine::{PayloadCodec, Timestamp};
use serde::{de::DeserializeOwned, Serialize};

/// Encode any serializable value through the payload codec.
pub(crate) fn encode<T: Serialize>(codec: &dyn PayloadCodec, value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(codec.encode(&value)?)
}

/// Inverse of [`encode`].
pub(crate) fn decode<T: DeserializeOwned>(codec: &dyn PayloadCodec, bytes: &[u8]) -> Result<T> {
    let value = codec.decode(bytes)?;
    Ok(serde_json::from_value(value)?)
}

// SQLite integers are signed; timestamps and sizes comfortably fit.
pub(crate) fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql(value: i64) -> Timestamp {
    u64::try_from(value).unwrap_or(0)
}
