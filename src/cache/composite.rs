//! Chain of cache tiers, fastest first

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{CacheBackend, CacheStats};
use crate::error::{Result, StoreError};

/// Multi-tier cache.
///
/// Reads check each tier in order and promote a hit into every earlier tier.
/// Writes, deletes and clears fan out to all tiers.
pub struct CompositeCache {
    tiers: Vec<Arc<dyn CacheBackend>>,
}

impl CompositeCache {
    pub fn new(tiers: Vec<Arc<dyn CacheBackend>>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(StoreError::configuration(
                "a composite cache needs at least one tier",
            ));
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheBackend>] {
        &self.tiers
    }

    /// Look a key up, promoting a hit into earlier tiers with `ttl`.
    ///
    /// The promotion TTL is the caller's, not the earlier tier's default, so
    /// promoted entries expire when the caller expects them to.
    pub async fn get_with_ttl(&self, key: &str, ttl: Option<Duration>) -> Result<Option<Value>> {
        for (depth, tier) in self.tiers.iter().enumerate() {
            if let Some(value) = tier.get(key).await? {
                if depth > 0 {
                    debug!(key, depth, "Promoting cache hit into faster tiers");
                }
                for earlier in &self.tiers[..depth] {
                    earlier.set(key, value.clone(), ttl).await?;
                }
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Per-tier statistics, fastest tier first
    pub fn tier_stats(&self) -> Vec<CacheStats> {
        self.tiers.iter().map(|t| t.stats()).collect()
    }
}

#[async_trait]
impl CacheBackend for CompositeCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.get_with_ttl(key, None).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        for tier in &self.tiers {
            tier.set(key, value.clone(), ttl).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut existed = false;
        for tier in &self.tiers {
            existed |= tier.delete(key).await?;
        }
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        for tier in &self.tiers {
            if tier.exists(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn clear(&self) -> Result<()> {
        for tier in &self.tiers {
            tier.clear().await?;
        }
        Ok(())
    }

    /// Largest count deleted by any single tier. Tiers without pattern
    /// support are skipped.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let mut max_deleted = 0;
        for tier in &self.tiers {
            match tier.delete_pattern(pattern).await {
                Ok(deleted) => max_deleted = max_deleted.max(deleted),
                Err(StoreError::NotImplemented(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(max_deleted)
    }

    fn stats(&self) -> CacheStats {
        self.tier_stats()
            .into_iter()
            .fold(CacheStats::default(), |mut acc, tier| {
                acc.size += tier.size;
                acc.hits += tier.hits;
                acc.misses += tier.misses;
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCache, LruCache};
    use serde_json::json;
    use std::collections::HashMap;

    /// Tier that only supports the required operations
    #[derive(Default)]
    struct PlainTier {
        map: parking_lot::Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl CacheBackend for PlainTier {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.map.lock().get(key).cloned())
        }
        async fn set(&self, key: &str, value: Value, _ttl: Option<Duration>) -> Result<()> {
            self.map.lock().insert(key.to_string(), value);
            Ok(())
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            Ok(self.map.lock().remove(key).is_some())
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.map.lock().contains_key(key))
        }
        async fn clear(&self) -> Result<()> {
            self.map.lock().clear();
            Ok(())
        }
        fn stats(&self) -> CacheStats {
            CacheStats {
                size: self.map.lock().len(),
                ..Default::default()
            }
        }
    }

    fn two_tiers() -> (Arc<LruCache>, Arc<InMemoryCache>, CompositeCache) {
        let l1 = Arc::new(LruCache::new(10, None));
        let l2 = Arc::new(InMemoryCache::new(None, None));
        let tiers: Vec<Arc<dyn CacheBackend>> = vec![l1.clone(), l2.clone()];
        let composite = CompositeCache::new(tiers).unwrap();
        (l1, l2, composite)
    }

    #[test]
    fn test_requires_a_tier() {
        assert!(CompositeCache::new(vec![]).is_err());
    }

    #[tokio::test]
    async fn test_hit_in_l2_promotes_to_l1() {
        let (l1, l2, composite) = two_tiers();
        l2.set("k", json!("v"), None).await.unwrap();

        assert_eq!(composite.get("k").await.unwrap(), Some(json!("v")));
        assert_eq!(l1.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_promotion_uses_caller_ttl() {
        let (l1, l2, composite) = two_tiers();
        l2.set("k", json!(1), None).await.unwrap();

        composite
            .get_with_ttl("k", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(l1.get("k").await.unwrap(), None);
        assert_eq!(l2.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_writes_fan_out() {
        let (l1, l2, composite) = two_tiers();
        composite.set("k", json!(1), None).await.unwrap();
        assert!(l1.exists("k").await.unwrap());
        assert!(l2.exists("k").await.unwrap());

        assert!(composite.delete("k").await.unwrap());
        assert!(!l1.exists("k").await.unwrap());
        assert!(!l2.exists("k").await.unwrap());
        assert!(!composite.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_pattern_skips_unsupported_tiers() {
        let plain = Arc::new(PlainTier::default());
        let lru = Arc::new(LruCache::new(10, None));
        let tiers: Vec<Arc<dyn CacheBackend>> = vec![plain.clone(), lru.clone()];
        let composite = CompositeCache::new(tiers).unwrap();

        composite.set("p:list:A:1", json!(1), None).await.unwrap();
        composite.set("p:list:A:2", json!(2), None).await.unwrap();

        assert_eq!(composite.delete_pattern("p:list:A:*").await.unwrap(), 2);
        assert!(lru.is_empty());
        assert_eq!(plain.stats().size, 2);
    }

    #[tokio::test]
    async fn test_stats_sum_tiers() {
        let (_l1, _l2, composite) = two_tiers();
        composite.set("a", json!(1), None).await.unwrap();
        assert_eq!(composite.stats().size, 2);
        assert_eq!(composite.tier_stats().len(), 2);
    }
}
