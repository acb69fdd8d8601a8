use serde::{Deserialize, Serialize};
use serde_json::Value;
use sextant_core::constants::UNKNOWN_REPO_STATE_ID;
use sextant_core::time::now_iso8601;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    repo_snapshot_id: String,
    created_at: String,
    inserted: Instant,
    ttl: Duration,
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted.elapsed() >= self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot_id: Option<String>,
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

impl CacheState {
    /// Drop everything computed against a snapshot other than `snapshot_id`.
    fn observe_snapshot(&mut self, snapshot_id: &str) {
        if self.snapshot_id.as_deref() == Some(snapshot_id) {
            return;
        }
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.repo_snapshot_id == snapshot_id);
        if before > 0 {
            debug!(
                snapshot = snapshot_id,
                dropped = before - self.entries.len(),
                "Repo snapshot changed; cleared stale cache entries"
            );
        }
        self.snapshot_id = Some(snapshot_id.to_string());
    }
}

/// A cache hit: the stored payload and when it was computed.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
    pub payload: Value,
    pub cached_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Snapshot-keyed memo of query and view payloads.
pub struct QueryCache {
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    max_entries: usize,
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_entries,
        }
    }

    pub fn get(&self, key: &str, snapshot_id: &str) -> Option<CachedPayload> {
        if snapshot_id == UNKNOWN_REPO_STATE_ID || self.max_entries == 0 {
            return None;
        }

        let Ok(mut state) = self.state.write() else {
            warn!("Query cache lock poisoned; treating as miss");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        state.observe_snapshot(snapshot_id);

        let hit = match state.entries.get(key).map(CacheEntry::is_expired) {
            Some(true) => {
                state.entries.remove(key);
                None
            }
            Some(false) => state.entries.get(key).map(|entry| CachedPayload {
                payload: entry.payload.clone(),
                cached_at: entry.created_at.clone(),
            }),
            None => None,
        };

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Store a payload. Concurrent writers for the same key: last write wins.
    pub fn set(&self, key: &str, payload: Value, snapshot_id: &str, ttl: Duration) {
        if snapshot_id == UNKNOWN_REPO_STATE_ID || self.max_entries == 0 || ttl.is_zero() {
            return;
        }
        let Ok(mut state) = self.state.write() else {
            warn!("Query cache lock poisoned; skipping write");
            return;
        };
        state.observe_snapshot(snapshot_id);

        if !state.entries.contains_key(key) && state.entries.len() >= self.max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                repo_snapshot_id: snapshot_id.to_string(),
                created_at: now_iso8601(),
                inserted: Instant::now(),
                ttl,
                seq,
            },
        );
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let Ok(mut state) = self.state.write() else {
            return 0;
        };
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        before - state.entries.len()
    }

    /// Clear all entries and reset the hit/miss counters. Returns the dropped count.
    pub fn invalidate_all(&self) -> usize {
        let dropped = match self.state.write() {
            Ok(mut state) => {
                let n = state.entries.len();
                state.entries.clear();
                state.snapshot_id = None;
                n
            }
            Err(_) => 0,
        };
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        dropped
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.state.read().map(|s| s.entries.len()).unwrap_or(0);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

/// Cache key for `operation` over normalized `options`: `op:<blake3 hex>`.
///
/// Object keys are sorted recursively so equivalent requests hash identically.
pub fn cache_key(operation: &str, options: &Value) -> String {
    let canonical = canonicalize(options).to_string();
    let hash = blake3::hash(format!("{operation}\n{canonical}").as_bytes());
    format!("{operation}:{}", hash.to_hex())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Sorted, deduplicated, trimmed filter list.
pub fn normalize_list<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn equivalent_options_share_a_key() {
        let a = cache_key(
            "search",
            &json!({"query": "engine", "kinds": normalize_list(["struct", "fn", "struct"])}),
        );
        let b = cache_key(
            "search",
            &json!({"kinds": normalize_list([" fn", "struct"]), "query": "engine"}),
        );
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
        assert_ne!(a, cache_key("refs", &json!({"query": "engine"})));
    }

    #[test]
    fn hit_and_miss_are_counted() {
        let cache = QueryCache::new(16);
        assert!(cache.get("k", "s1").is_none());
        cache.set("k", json!({"n": 1}), "s1", TTL);
        let hit = cache.get("k", "s1").unwrap();
        assert_eq!(hit.payload, json!({"n": 1}));
        assert!(!hit.cached_at.is_empty());

        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn new_snapshot_clears_old_entries() {
        let cache = QueryCache::new(16);
        cache.set("k", json!(1), "s1", TTL);
        assert!(cache.get("k", "s2").is_none());
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.get("k", "s1").is_none());
    }

    #[test]
    fn unknown_snapshot_is_never_cached() {
        let cache = QueryCache::new(16);
        cache.set("k", json!(1), UNKNOWN_REPO_STATE_ID, TTL);
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.get("k", UNKNOWN_REPO_STATE_ID).is_none());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = QueryCache::new(16);
        cache.set("k", json!(1), "s1", Duration::from_nanos(1));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("k", "s1").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = QueryCache::new(2);
        cache.set("a", json!(1), "s1", TTL);
        cache.set("b", json!(2), "s1", TTL);
        cache.set("c", json!(3), "s1", TTL);
        assert!(cache.get("a", "s1").is_none());
        assert!(cache.get("b", "s1").is_some());
        assert!(cache.get("c", "s1").is_some());
    }

    #[test]
    fn invalidate_all_resets_counters() {
        let cache = QueryCache::new(16);
        cache.set("view:arch", json!(1), "s1", TTL);
        cache.set("search:x", json!(2), "s1", TTL);
        cache.get("search:x", "s1");
        assert_eq!(cache.invalidate_prefix("view:"), 1);
        assert_eq!(cache.invalidate_all(), 1);
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (0, 0, 0));
        assert_eq!(stats.hit_rate, 0.0);
    }
}
