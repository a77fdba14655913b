//! Cache admission: which blobs to evict so an incoming write fits.
//!
//! Only cache entries are ever evicted, never records. The incoming write is
//! always admitted, even when it alone is larger than the whole budget.

use serde::{Deserialize, Serialize};

/// What the admission policy needs to know about a resident blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryMeta {
    pub key: String,
    pub size_bytes: u64,
    /// Logical access stamp; higher means more recently used
    pub last_access: u64,
}

/// Least-recently-used eviction under a byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicy {
    pub budget_bytes: u64,
}

impl AdmissionPolicy {
    pub fn new(budget_bytes: u64) -> Self {
        Self { budget_bytes }
    }

    /// Keys to evict, oldest first, before writing `incoming_size` bytes under
    /// `key`. An existing entry under the same key is being replaced, so its
    /// bytes do not count against the budget and it is never evicted.
    pub fn plan(&self, resident: &[CacheEntryMeta], key: &str, incoming_size: u64) -> Vec<String> {
        let mut candidates: Vec<&CacheEntryMeta> =
            resident.iter().filter(|entry| entry.key != key).collect();
        let mut total: u64 = candidates.iter().map(|entry| entry.size_bytes).sum();

        if total.saturating_add(incoming_size) <= self.budget_bytes {
            return Vec::new();
        }

        candidates.sort_by(|a, b| {
            a.last_access
                .cmp(&b.last_access)
                .then_with(|| a.key.cmp(&b.key))
        });

        let mut evicted = Vec::new();
        for entry in candidates {
            if total.saturating_add(incoming_size) <= self.budget_bytes {
                break;
            }
            total -= entry.size_bytes;
            evicted.push(entry.key.clone());
        }
        evicted
    }
}
