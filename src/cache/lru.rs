//! Bounded least-recently-used cache with hit/miss counters

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{CacheBackend, CacheEntry, CacheStats, GlobPattern};
use crate::error::Result;

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Slot>,
    /// Access tick -> key, least recently used first
    recency: BTreeMap<u64, String>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl State {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        let tick = self.clock;
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(slot) => {
                self.recency.remove(&slot.tick);
                true
            }
            None => false,
        }
    }
}

pub struct LruCache {
    state: Mutex<State>,
    max_size: usize,
    default_ttl: Option<Duration>,
}

impl Default for LruCache {
    fn default() -> Self {
        Self::new(1000, Some(Duration::from_secs(300)))
    }
}

impl LruCache {
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_size: max_size.max(1),
            default_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for LruCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return Ok(None);
            }
            Some(slot) => slot.entry.is_expired(),
        };
        if expired {
            state.remove(key);
            state.misses += 1;
            return Ok(None);
        }

        state.touch(key);
        state.hits += 1;
        Ok(state.entries.get(key).map(|slot| slot.entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(value, ttl.or(self.default_ttl));
        let mut state = self.state.lock();

        if let Some(slot) = state.entries.get_mut(key) {
            slot.entry = entry;
            state.touch(key);
            return Ok(());
        }

        while state.entries.len() >= self.max_size {
            let Some((_, lru)) = state.recency.pop_first() else {
                break;
            };
            state.entries.remove(&lru);
        }

        state.clock += 1;
        let tick = state.clock;
        state.recency.insert(tick, key.to_string());
        state.entries.insert(key.to_string(), Slot { entry, tick });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().remove(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            None => return Ok(false),
            Some(slot) => slot.entry.is_expired(),
        };
        if expired {
            state.remove(key);
            return Ok(false);
        }
        Ok(true)
    }

    /// Drops every entry and resets the hit/miss counters
    async fn clear(&self) -> Result<()> {
        *self.state.lock() = State::default();
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let glob = GlobPattern::new(pattern)?;
        let mut state = self.state.lock();
        let matching: Vec<String> = state
            .entries
            .keys()
            .filter(|key| glob.matches(key))
            .cloned()
            .collect();
        for key in &matching {
            state.remove(key);
        }
        Ok(matching.len())
    }

    fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            max_size: Some(self.max_size),
            hits: state.hits,
            misses: state.misses,
            default_ttl: self.default_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // Eviction Order Tests
    // =========================================================================

    #[tokio::test]
    async fn test_evicts_first_inserted_without_gets() {
        let cache = LruCache::new(3, None);
        for key in ["a", "b", "c", "d"] {
            cache.set(key, json!(key), None).await.unwrap();
        }

        assert!(!cache.exists("a").await.unwrap());
        for key in ["b", "c", "d"] {
            assert!(cache.exists(key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_get_protects_from_eviction() {
        let cache = LruCache::new(3, None);
        for key in ["a", "b", "c"] {
            cache.set(key, json!(key), None).await.unwrap();
        }
        cache.get("a").await.unwrap();
        cache.set("d", json!("d"), None).await.unwrap();

        assert!(cache.exists("a").await.unwrap());
        assert!(!cache.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_recency() {
        let cache = LruCache::new(2, None);
        cache.set("a", json!(1), None).await.unwrap();
        cache.set("b", json!(2), None).await.unwrap();
        cache.set("a", json!(3), None).await.unwrap();
        cache.set("c", json!(4), None).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), Some(json!(3)));
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.len(), 2);
    }

    // =========================================================================
    // Stats Tests
    // =========================================================================

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let cache = LruCache::default();
        cache.set("a", json!(1), None).await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("missing").await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.max_size, Some(1000));

        cache.clear().await.unwrap();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_expired_counts_as_miss() {
        let cache = LruCache::new(10, Some(Duration::from_millis(5)));
        cache.set("a", json!(1), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.stats().misses, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = LruCache::default();
        cache.set("p:list:A:1", json!(1), None).await.unwrap();
        cache.set("p:list:A:2", json!(1), None).await.unwrap();
        cache.set("p:model:A:1", json!(1), None).await.unwrap();

        assert_eq!(cache.delete_pattern("p:list:A:*").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }
}
