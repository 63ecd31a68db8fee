//! In-process cache tier
//!
//! Backends store `serde_json::Value` entries keyed by strings built with
//! [`keys::CacheKeyBuilder`]. Every backend guards its map for a single
//! operation at a time; no lock is held across object store I/O.

pub mod composite;
pub mod keys;
pub mod lru;
pub mod memory;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, StoreError};

pub use composite::CompositeCache;
pub use keys::CacheKeyBuilder;
pub use lru::LruCache;
pub use memory::InMemoryCache;

/// A cached value with an optional expiry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// An entry without expiry never expires
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Occupancy and hit counters reported by a backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub default_ttl: Option<Duration>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Common contract of every cache tier.
///
/// `ttl: None` on `set` means "use the backend's default TTL".
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key was present
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    /// Delete every key matching a glob such as `s3v:model:Product:*`.
    ///
    /// Backends that cannot enumerate keys keep this default.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        Err(StoreError::NotImplemented(format!(
            "pattern deletion of '{}' is not supported by this cache backend",
            pattern
        )))
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set_many(&self, entries: HashMap<String, Value>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn stats(&self) -> CacheStats;
}

/// Shell-style glob compiled to an anchored regex.
///
/// `*` matches any run of characters, `?` a single character, and `[...]` a
/// character class (`[!...]` negates). Everything else is literal.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
            StoreError::validation(format!("invalid cache key pattern '{}': {}", pattern, e))
        })?;
        Ok(Self { regex })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i + 1);
                match close {
                    Some(end) if end > i + 1 => {
                        out.push('[');
                        let mut body = &chars[i + 1..end];
                        if body.first() == Some(&'!') {
                            out.push('^');
                            body = &body[1..];
                        }
                        for c in body {
                            if *c == '\\' || *c == '[' {
                                out.push('\\');
                            }
                            out.push(*c);
                        }
                        out.push(']');
                        i = end;
                    }
                    _ => out.push_str(r"\["),
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}
