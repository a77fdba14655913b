//! Pluggable payload transform applied before anything touches disk.
//!
//! Contract: `decode(encode(v)) == v` for every JSON value. Compression or
//! encryption schemes plug in here; the engine never assumes a size gain.

use crate::{error::Result, Error};

/// Reversible payload encoding.
pub trait PayloadCodec: Send + Sync {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    fn encode(&self, payload: &serde_json::Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// Plain JSON bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, payload: &serde_json::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(payload).map_err(|e| Error::Codec {
            codec: self.name(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}
