//! Configuration for DocumentStore
//!
//! Provides a builder pattern for configuring the store, its client pool and
//! its cache tier.

use std::time::Duration;

use crate::error::{Result, StoreError};

/// Configuration for the client connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live connections (checked out + idle)
    pub max_connections: usize,
    /// How long `acquire` waits for a connection before failing
    pub connection_timeout: Duration,
    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            max_idle: 10,
        }
    }
}

impl PoolConfig {
    pub fn new(max_connections: usize, connection_timeout: Duration) -> Self {
        Self {
            max_connections,
            connection_timeout,
            max_idle: max_connections,
        }
    }
}

/// TTLs the store uses when populating the cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for single-record entries (`None` defers to the backend default)
    pub default_ttl: Option<Duration>,
    /// TTL for list and count entries
    pub list_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(300)),
            list_ttl: Some(Duration::from_secs(60)),
        }
    }
}

/// Configuration for the document store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Bucket holding every record
    pub bucket: String,
    /// Key prefix prepended to every model prefix (default: "")
    pub base_path: String,
    /// Global prefix for cache keys (default: "s3v")
    pub cache_prefix: String,
    /// Whether reads go through the cache tier (default: true)
    pub cache_enabled: bool,
    /// Maximum keys requested per list call
    pub list_page_size: usize,
    /// Safety cap on keys scanned by a single query
    pub max_scan_keys: usize,
    /// Page size used when a query does not set one
    pub default_page_size: usize,
    /// Client pool configuration
    pub pool: PoolConfig,
    /// Cache TTL configuration
    pub cache: CacheConfig,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(bucket: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(bucket)
    }

    /// Build a configuration from `DOCBUCKET_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bucket = lookup("DOCBUCKET_BUCKET")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| StoreError::missing_configuration(vec!["DOCBUCKET_BUCKET".into()]))?;

        let mut builder = StoreConfigBuilder::new(bucket);
        if let Some(base_path) = lookup("DOCBUCKET_BASE_PATH") {
            builder = builder.base_path(base_path);
        }
        if let Some(prefix) = lookup("DOCBUCKET_CACHE_PREFIX") {
            builder = builder.cache_prefix(prefix);
        }

        let mut pool = PoolConfig::default();
        if let Some(raw) = lookup("DOCBUCKET_MAX_CONNECTIONS") {
            pool.max_connections = parse_env("DOCBUCKET_MAX_CONNECTIONS", &raw)?;
            pool.max_idle = pool.max_connections;
        }
        if let Some(raw) = lookup("DOCBUCKET_CONNECTION_TIMEOUT_SECS") {
            pool.connection_timeout =
                Duration::from_secs(parse_env("DOCBUCKET_CONNECTION_TIMEOUT_SECS", &raw)?);
        }

        let config = builder.pool(pool).build();
        config.validate()?;
        Ok(config)
    }

    /// Check for settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(StoreError::missing_configuration(vec!["bucket".into()]));
        }
        if self.pool.max_connections == 0 {
            return Err(StoreError::configuration(
                "pool.max_connections must be at least 1",
            ));
        }
        if !self.base_path.is_empty() && !self.base_path.ends_with('/') {
            return Err(StoreError::configuration(format!(
                "base_path '{}' must end with '/'",
                self.base_path
            )));
        }
        if self.list_page_size == 0 {
            return Err(StoreError::configuration("list_page_size must be at least 1"));
        }
        Ok(())
    }

    /// Key of a system object, e.g. `_system/migration_history.json`
    pub fn system_key(&self, name: &str) -> String {
        format!("{}_system/{}", self.base_path, name)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        StoreError::configuration(format!("{} has an invalid value: '{}'", name, raw))
    })
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    bucket: String,
    base_path: String,
    cache_prefix: String,
    cache_enabled: bool,
    list_page_size: usize,
    max_scan_keys: usize,
    default_page_size: usize,
    pool: PoolConfig,
    cache: CacheConfig,
}

impl StoreConfigBuilder {
    /// Create a new builder for the bucket
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            base_path: String::new(),
            cache_prefix: "s3v".to_string(),
            cache_enabled: true,
            list_page_size: 1000,
            max_scan_keys: 10_000,
            default_page_size: 20,
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Set the base path prepended to every key (default: "")
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Set the cache key prefix (default: "s3v")
    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    /// Enable or disable cache-first reads (default: true)
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Set the number of keys requested per list call (default: 1000)
    pub fn list_page_size(mut self, size: usize) -> Self {
        self.list_page_size = size;
        self
    }

    /// Set the per-query scan cap (default: 10000)
    pub fn max_scan_keys(mut self, max: usize) -> Self {
        self.max_scan_keys = max;
        self
    }

    /// Set the default page size (default: 20)
    pub fn default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// Set the client pool configuration
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Shorthand for the two pool settings callers usually touch
    pub fn max_connections(mut self, max: usize, timeout: Duration) -> Self {
        self.pool = PoolConfig::new(max, timeout);
        self
    }

    /// Set the cache TTL configuration
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            bucket: self.bucket,
            base_path: self.base_path,
            cache_prefix: self.cache_prefix,
            cache_enabled: self.cache_enabled,
            list_page_size: self.list_page_size,
            max_scan_keys: self.max_scan_keys,
            default_page_size: self.default_page_size,
            pool: self.pool,
            cache: self.cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // =========================================================================
    // Default Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = StoreConfig::builder("data").build();

        assert_eq!(config.bucket, "data");
        assert_eq!(config.base_path, "");
        assert_eq!(config.cache_prefix, "s3v");
        assert!(config.cache_enabled);
        assert_eq!(config.list_page_size, 1000);
        assert_eq!(config.max_scan_keys, 10_000);
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.connection_timeout, Duration::from_secs(30));
        assert_eq!(config.cache.default_ttl, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_pool_config_new_matches_idle() {
        let pool = PoolConfig::new(4, Duration::from_millis(500));
        assert_eq!(pool.max_connections, 4);
        assert_eq!(pool.max_idle, 4);
    }

    // =========================================================================
    // Builder Tests
    // =========================================================================

    #[test]
    fn test_full_custom_config() {
        let config = StoreConfig::builder("data")
            .base_path("tenant-a/")
            .cache_prefix("app")
            .cache_enabled(false)
            .list_page_size(100)
            .max_scan_keys(500)
            .default_page_size(50)
            .max_connections(2, Duration::from_secs(1))
            .build();

        assert_eq!(config.base_path, "tenant-a/");
        assert_eq!(config.cache_prefix, "app");
        assert!(!config.cache_enabled);
        assert_eq!(config.list_page_size, 100);
        assert_eq!(config.max_scan_keys, 500);
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.pool.max_connections, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_system_key() {
        let config = StoreConfig::builder("data").base_path("app/").build();
        assert_eq!(
            config.system_key("migration_history.json"),
            "app/_system/migration_history.json"
        );
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validate_rejects_base_path_without_slash() {
        let config = StoreConfig::builder("data").base_path("app").build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must end with '/'"));
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = StoreConfig::builder("data")
            .max_connections(0, Duration::from_secs(1))
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_bucket() {
        let config = StoreConfig::builder("").build();
        assert!(matches!(
            config.validate(),
            Err(StoreError::Configuration { .. })
        ));
    }

    // =========================================================================
    // Environment Tests
    // =========================================================================

    #[test]
    fn test_from_env_requires_bucket() {
        let err = StoreConfig::from_lookup(lookup_from(&[])).unwrap_err();
        match err {
            StoreError::Configuration { missing, .. } => {
                assert_eq!(missing, vec!["DOCBUCKET_BUCKET".to_string()]);
            }
            other => panic!("Expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_env_reads_all_settings() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("DOCBUCKET_BUCKET", "records"),
            ("DOCBUCKET_BASE_PATH", "prod/"),
            ("DOCBUCKET_CACHE_PREFIX", "p"),
            ("DOCBUCKET_MAX_CONNECTIONS", "4"),
            ("DOCBUCKET_CONNECTION_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.bucket, "records");
        assert_eq!(config.base_path, "prod/");
        assert_eq!(config.cache_prefix, "p");
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.max_idle, 4);
        assert_eq!(config.pool.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env_rejects_bad_number() {
        let err = StoreConfig::from_lookup(lookup_from(&[
            ("DOCBUCKET_BUCKET", "records"),
            ("DOCBUCKET_MAX_CONNECTIONS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DOCBUCKET_MAX_CONNECTIONS"));
    }

    #[test]
    fn test_config_clone() {
        let config1 = StoreConfig::builder("data").base_path("x/").build();
        let config2 = config1.clone();
        assert_eq!(config1.bucket, config2.bucket);
        assert_eq!(config1.base_path, config2.base_path);
    }
}
