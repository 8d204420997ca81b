//! Action Cache: content-addressed memoization of idempotent action results, with
//! TTL and LRU-by-insertion eviction. Process-wide working-set memoization, not a
//! persisted table — it disappears with the process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use wayfinder_types::CacheEntry;

const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_CAPACITY: usize = 1000;
const KEY_LEN: usize = 16;

/// Fields `normalize` drops before hashing, because they vary run-to-run without changing
/// what the action would actually compute.
const UNSTABLE_FIELDS: [&str; 3] = ["state", "request_id", "timestamp"];

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("custom cache key template references unknown placeholder `{0}`")]
    UnknownPlaceholder(String),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

#[derive(Clone)]
pub struct ActionCache {
    inner: Arc<RwLock<Inner>>,
    default_ttl_ms: u64,
    capacity: usize,
}

impl ActionCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL_MS, DEFAULT_CAPACITY)
    }

    pub fn with_config(default_ttl_ms: u64, capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            })),
            default_ttl_ms,
            capacity,
        }
    }

    /// If `custom` is present, substitute `{k}` placeholders from `input`; otherwise hash
    /// `name` together with a normalized, key-sorted stringification of `input`, keeping
    /// the first 16 hex chars of the digest.
    pub fn generate_cache_key(
        name: &str,
        input: &Value,
        custom: Option<&str>,
    ) -> Result<String, CacheError> {
        if let Some(template) = custom {
            return substitute_placeholders(template, input);
        }
        let normalized = normalize(input);
        let stable = stable_stringify(&normalized);
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(stable.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(hex[..KEY_LEN].to_string())
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let hit = guard
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone());
        if hit.is_some() {
            guard.stats.hits += 1;
        } else {
            guard.stats.misses += 1;
            guard.entries.remove(key);
        }
        hit
    }

    pub async fn set(&self, key: String, value: Value, ttl_ms: Option<u64>) {
        let mut guard = self.inner.write().await;
        guard.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at: Utc::now(),
                ttl_ms: ttl_ms.unwrap_or(self.default_ttl_ms),
            },
        );
        evict_if_over_capacity(&mut guard.entries, self.capacity);
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.write().await.entries.remove(key).is_some()
    }

    /// Deletes every entry whose key contains `pattern` as a substring — useful for
    /// invalidating a whole action family (e.g. all `transport.*` results) after a repair.
    pub async fn delete_by_pattern(&self, pattern: &str) -> usize {
        let mut guard = self.inner.write().await;
        let to_remove: Vec<String> = guard
            .entries
            .keys()
            .filter(|k| k.contains(pattern))
            .cloned()
            .collect();
        for key in &to_remove {
            guard.entries.remove(key);
        }
        to_remove.len()
    }

    pub async fn cleanup_expired(&self) -> usize {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let before = guard.entries.len();
        guard.entries.retain(|_, entry| !entry.is_expired(now));
        before - guard.entries.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats
    }
}

impl Default for ActionCache {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_if_over_capacity(entries: &mut HashMap<String, CacheEntry>, capacity: usize) {
    while entries.len() > capacity {
        let oldest_key = entries
            .values()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| entry.key.clone());
        let Some(key) = oldest_key else { break };
        entries.remove(&key);
    }
}

fn substitute_placeholders(template: &str, input: &Value) -> Result<String, CacheError> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            result.push(c);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                closed = true;
                break;
            }
            name.push(inner);
        }
        if !closed {
            result.push('{');
            result.push_str(&name);
            continue;
        }
        let value = input
            .get(&name)
            .ok_or_else(|| CacheError::UnknownPlaceholder(name.clone()))?;
        result.push_str(&value_to_plain_string(value));
    }
    Ok(result)
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Drops `{state, request_id, timestamp}` at every nesting level so two otherwise-equal
/// inputs that only differ in those fields hash identically.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut next = serde_json::Map::new();
            for (k, v) in map {
                if UNSTABLE_FIELDS.contains(&k.as_str()) {
                    continue;
                }
                next.insert(k.clone(), normalize(v));
            }
            Value::Object(next)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Emits object keys in sorted order so field reordering does not change the hash.
fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, stable_stringify(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_ignores_unstable_fields_and_key_order() {
        let a = json!({"query": "tokyo", "limit": 20, "state": "whatever", "request_id": "r1"});
        let b = json!({"request_id": "r2", "limit": 20, "query": "tokyo", "timestamp": 123});
        let ka = ActionCache::generate_cache_key("places.resolve_entities", &a, None).unwrap();
        let kb = ActionCache::generate_cache_key("places.resolve_entities", &b, None).unwrap();
        assert_eq!(ka, kb);
        assert_eq!(ka.len(), 16);
    }

    #[test]
    fn cache_key_differs_by_action_name() {
        let input = json!({"query": "tokyo"});
        let ka = ActionCache::generate_cache_key("places.resolve_entities", &input, None).unwrap();
        let kb = ActionCache::generate_cache_key("places.get_poi_facts", &input, None).unwrap();
        assert_ne!(ka, kb);
    }

    #[test]
    fn custom_template_substitutes_placeholders() {
        let input = json!({"poi_id": "poi-42"});
        let key =
            ActionCache::generate_cache_key("places.get_poi_facts", &input, Some("facts:{poi_id}"))
                .unwrap();
        assert_eq!(key, "facts:poi-42");
    }

    #[tokio::test]
    async fn get_set_roundtrip() {
        let cache = ActionCache::new();
        cache.set("k1".to_string(), json!({"ok": true}), None).await;
        assert_eq!(cache.get("k1").await, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = ActionCache::with_config(0, 10);
        cache.set("k1".to_string(), json!(1), None).await;
        assert_eq!(cache.get("k1").await, None);
    }

    #[tokio::test]
    async fn lru_eviction_respects_capacity() {
        let cache = ActionCache::with_config(DEFAULT_TTL_MS, 3);
        for i in 0..5 {
            cache.set(format!("k{i}"), json!(i), None).await;
        }
        assert!(cache.len().await <= 3);
    }

    #[tokio::test]
    async fn delete_by_pattern_removes_matching_keys() {
        let cache = ActionCache::new();
        cache.set("transport:a".to_string(), json!(1), None).await;
        cache.set("transport:b".to_string(), json!(2), None).await;
        cache.set("places:a".to_string(), json!(3), None).await;
        let removed = cache.delete_by_pattern("transport:").await;
        assert_eq!(removed, 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = ActionCache::new();
        cache.set("k1".to_string(), json!(1), None).await;
        let _ = cache.get("k1").await;
        let _ = cache.get("missing").await;
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
