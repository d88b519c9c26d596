/// Debounce cache for observed buys
///
/// Maps opaque keys (`buy:{wallet}:{mint}`) to the millisecond timestamp of
/// the last accepted signal. Dedup is advisory: the get-then-set in the
/// detector is not atomic, which is acceptable because a rare double-accept
/// is still gated by the pipeline's in-flight lock.

use anyhow::Result;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::core::now_ms;
use crate::store::write_json_atomic;

pub struct SeenCache {
    entries: DashMap<String, i64>,
    path: PathBuf,
}

pub fn buy_key(wallet: &str, mint: &str) -> String {
    format!("buy:{wallet}:{mint}")
}

impl SeenCache {
    /// Load the snapshot from disk; a missing or corrupt file starts empty.
    pub fn load(path: PathBuf) -> Self {
        let entries = DashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, i64>>(&raw) {
                Ok(map) => {
                    for (k, v) in map {
                        entries.insert(k, v);
                    }
                    debug!(count = entries.len(), "seen cache loaded");
                }
                Err(e) => warn!("seen snapshot corrupt, starting empty: {e}"),
            },
            Err(_) => debug!("no seen snapshot, starting empty"),
        }
        Self { entries, path }
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.entries.get(key).map(|v| *v)
    }

    pub fn set(&self, key: &str, ts_ms: i64) {
        self.entries.insert(key.to_string(), ts_ms);
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// True when the key was set within the TTL window.
    pub fn seen_within(&self, key: &str, ttl_ms: i64) -> bool {
        match self.get(key) {
            Some(ts) => now_ms() - ts < ttl_ms,
            None => false,
        }
    }

    /// Check-and-mark in one call: returns false (and marks) when the key is
    /// fresh, true when it was already set within the TTL.
    pub fn check_and_mark(&self, key: &str, ttl_ms: i64) -> bool {
        if self.seen_within(key, ttl_ms) {
            return true;
        }
        self.set(key, now_ms());
        false
    }

    /// Drop entries older than the TTL so the snapshot does not grow forever.
    pub fn purge_expired(&self, ttl_ms: i64) {
        let cutoff = now_ms() - ttl_ms;
        self.entries.retain(|_, ts| *ts >= cutoff);
    }

    /// Best-effort durable snapshot via temp-file-then-rename.
    pub fn snapshot(&self) -> Result<()> {
        let map: HashMap<String, i64> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        write_json_atomic(&self.path, &map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("shadow-seen-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn test_check_and_mark_debounces() {
        let cache = SeenCache::load(temp_path("debounce"));
        let key = buy_key("W", "M");

        assert!(!cache.check_and_mark(&key, 60_000));
        assert!(cache.check_and_mark(&key, 60_000));
    }

    #[test]
    fn test_expired_entry_is_not_seen() {
        let cache = SeenCache::load(temp_path("expired"));
        let key = buy_key("W", "M");
        cache.set(&key, now_ms() - 120_000);

        assert!(!cache.seen_within(&key, 60_000));
        assert!(!cache.check_and_mark(&key, 60_000));
    }

    #[test]
    fn test_purge_drops_only_stale_entries() {
        let cache = SeenCache::load(temp_path("purge"));
        cache.set("old", now_ms() - 120_000);
        cache.set("fresh", now_ms());

        cache.purge_expired(60_000);
        assert!(cache.get("old").is_none());
        assert!(cache.get("fresh").is_some());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let path = temp_path("roundtrip");
        let cache = SeenCache::load(path.clone());
        cache.set("buy:W:M", 1234);
        cache.snapshot().unwrap();

        let reloaded = SeenCache::load(path.clone());
        assert_eq!(reloaded.get("buy:W:M"), Some(1234));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();
        let cache = SeenCache::load(path.clone());
        assert!(cache.is_empty());
        let _ = std::fs::remove_file(path);
    }
}
