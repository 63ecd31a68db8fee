//! TTL map cache
//!
//! Unbounded unless `max_size` is set; on overflow the oldest inserted key is
//! evicted. Expired entries are swept at most once per `cleanup_interval`,
//! piggybacked on `set`.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{CacheBackend, CacheEntry, CacheStats, GlobPattern};
use crate::error::Result;

struct Slot {
    entry: CacheEntry,
    seq: u64,
}

struct State {
    entries: HashMap<String, Slot>,
    /// Insertion sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
    last_cleanup: Instant,
}

impl State {
    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot)
    }

    fn live_value(&mut self, key: &str) -> Option<Value> {
        let expired = self.entries.get(key)?.entry.is_expired();
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|slot| slot.entry.value.clone())
    }
}

pub struct InMemoryCache {
    state: Mutex<State>,
    default_ttl: Option<Duration>,
    max_size: Option<usize>,
    cleanup_interval: Duration,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(300)), None)
    }
}

impl InMemoryCache {
    pub fn new(default_ttl: Option<Duration>, max_size: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                last_cleanup: Instant::now(),
            }),
            default_ttl,
            max_size,
            cleanup_interval: Duration::from_secs(60),
        }
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_cleanup(&self, state: &mut State) {
        if state.last_cleanup.elapsed() < self.cleanup_interval {
            return;
        }
        state.last_cleanup = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            state.remove(&key);
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.state.lock().live_value(key))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(value, ttl.or(self.default_ttl));
        let mut state = self.state.lock();

        if let Some(slot) = state.entries.get_mut(key) {
            slot.entry = entry;
        } else {
            if let Some(max) = self.max_size {
                while state.entries.len() >= max.max(1) {
                    let Some((_, oldest)) = state.order.pop_first() else {
                        break;
                    };
                    state.entries.remove(&oldest);
                }
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.order.insert(seq, key.to_string());
            state.entries.insert(key.to_string(), Slot { entry, seq });
        }

        self.maybe_cleanup(&mut state);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().live_value(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
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
        CacheStats {
            size: self.len(),
            max_size: self.max_size,
            hits: 0,
            misses: 0,
            default_ttl: self.default_ttl,
        }
    }
}
