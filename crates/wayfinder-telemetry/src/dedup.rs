//! Request dedup: a short-TTL cache keyed on the parts of a request that determine its
//! answer, so two near-simultaneous identical requests do the work once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

const DEFAULT_TTL_MS: u64 = 5_000;
const RECENT_MESSAGES_CONSIDERED: usize = 3;

/// The request fields a dedup decision is computed from. Anything else about the
/// request (e.g. `request_id`, timestamps) must not affect the key.
#[derive(Debug, Clone)]
pub struct DedupRequest<'a> {
    pub message: &'a str,
    pub user_id: &'a str,
    pub trip_id: Option<&'a str>,
    pub dry_run: bool,
    pub allow_webbrowse: bool,
    pub recent_messages: &'a [String],
}

/// Hashes `message + user_id + trip_id + {dry_run, allow_webbrowse} + the last 3 recent
/// messages` into a stable hex digest.
pub fn dedup_key(request: &DedupRequest<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.message.as_bytes());
    hasher.update(b"|");
    hasher.update(request.user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(request.trip_id.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update([request.dry_run as u8, request.allow_webbrowse as u8]);
    let tail_start = request
        .recent_messages
        .len()
        .saturating_sub(RECENT_MESSAGES_CONSIDERED);
    for message in &request.recent_messages[tail_start..] {
        hasher.update(b"|");
        hasher.update(message.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

struct Entry {
    response: Value,
    inserted_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.inserted_at).num_milliseconds() > self.ttl_ms as i64
    }
}

#[derive(Clone)]
pub struct DedupCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    ttl_ms: u64,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_MS)
    }

    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl_ms,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let guard = self.entries.read().await;
        guard
            .get(key)
            .filter(|entry| !entry.is_expired(Utc::now()))
            .map(|entry| entry.response.clone())
    }

    pub async fn set(&self, key: String, response: Value) {
        let mut guard = self.entries.write().await;
        guard.insert(
            key,
            Entry {
                response,
                inserted_at: Utc::now(),
                ttl_ms: self.ttl_ms,
            },
        );
    }

    pub async fn cleanup_expired(&self) -> usize {
        let mut guard = self.entries.write().await;
        let now = Utc::now();
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now));
        before - guard.len()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}
