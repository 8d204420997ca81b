use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single cache slot. LRU-by-insertion means the store compares `inserted_at`, not
/// access recency, when it needs to evict.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub inserted_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.inserted_at).num_milliseconds().max(0) as u64;
        age_ms >= self.ttl_ms
    }
}
