//! Revoked access-token ids, cached in memory and persisted as one object
//!
//! `add` updates memory before writing the object, and a failed write is
//! logged rather than undone. Entries that could not be persisted are kept
//! in memory and retried with the next successful write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Result, StoreError};
use crate::store::DocumentStore;

const BLACKLIST_OBJECT: &str = "token_blacklist.json";
/// Retry delay after the very first load fails
const FAILED_LOAD_RETRY: Duration = Duration::from_secs(30);

/// One revoked token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub jti: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
}

/// Body of `_system/token_blacklist.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BlacklistDocument {
    #[serde(default)]
    entries: Vec<BlacklistEntry>,
}

impl BlacklistDocument {
    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.expires_at > now);
        before - self.entries.len()
    }
}

#[derive(Default)]
struct BlacklistState {
    jtis: HashSet<String>,
    /// Added locally but not yet written to the store
    unpersisted: HashMap<String, DateTime<Utc>>,
    valid_until: Option<Instant>,
}

pub struct TokenBlacklist {
    store: Arc<DocumentStore>,
    key: String,
    cache_ttl: Duration,
    state: Mutex<BlacklistState>,
    /// Serializes read-modify-write of the blacklist object
    write_lock: tokio::sync::Mutex<()>,
}

impl TokenBlacklist {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        let key = store.config().system_key(BLACKLIST_OBJECT);
        Self {
            store,
            key,
            cache_ttl: Duration::from_secs(300),
            state: Mutex::new(BlacklistState::default()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// How long the in-memory view is trusted before reloading
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Revoke `jti` until `expires_at`. Returns whether the entry was persisted.
    pub async fn add(&self, jti: &str, expires_at: DateTime<Utc>) -> bool {
        {
            let mut state = self.state.lock();
            state.jtis.insert(jti.to_string());
            state.unpersisted.insert(jti.to_string(), expires_at);
        }

        match self.persist().await {
            Ok(()) => true,
            Err(e) => {
                error!(jti, error = %e, "Failed to persist blacklist entry; keeping it in memory");
                false
            }
        }
    }

    pub async fn is_blacklisted(&self, jti: &str) -> bool {
        let stale = {
            let state = self.state.lock();
            if state.jtis.contains(jti) {
                return true;
            }
            state.valid_until.is_none_or(|until| Instant::now() >= until)
        };
        if stale {
            self.reload().await;
        }
        self.state.lock().jtis.contains(jti)
    }

    /// Prune expired entries from the stored object; returns how many were removed
    pub async fn cleanup(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let Some(mut document) = self.load_document().await? else {
            return Ok(0);
        };
        let removed = document.prune(Utc::now());
        self.store
            .write_json(&self.key, &serde_json::to_value(&document)?)
            .await?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.jtis = document.entries.iter().map(|e| e.jti.clone()).collect();
        state.jtis.extend(state.unpersisted.keys().cloned());
        state.valid_until = Some(Instant::now() + self.cache_ttl);
        debug!(removed, "Cleaned up token blacklist");
        Ok(removed)
    }

    /// Forget the in-memory view; the next check reloads from the store
    pub fn clear_cache(&self) {
        let mut state = self.state.lock();
        state.jtis.clear();
        state.valid_until = None;
    }

    async fn load_document(&self) -> Result<Option<BlacklistDocument>> {
        match self.store.read_json(&self.key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::validation(format!("Token blacklist is corrupt: {}", e))),
            None => Ok(None),
        }
    }

    /// Replace the in-memory view with the stored one. Failures keep the
    /// stale view.
    async fn reload(&self) {
        match self.load_document().await {
            Ok(document) => {
                let now = Utc::now();
                let mut state = self.state.lock();
                state.unpersisted.retain(|_, expires| *expires > now);
                let mut jtis: HashSet<String> = document
                    .unwrap_or_default()
                    .entries
                    .into_iter()
                    .filter(|e| e.expires_at > now)
                    .map(|e| e.jti)
                    .collect();
                jtis.extend(state.unpersisted.keys().cloned());
                state.jtis = jtis;
                state.valid_until = Some(Instant::now() + self.cache_ttl);
            }
            Err(e) => {
                error!(error = %e, "Failed to load token blacklist; keeping cached entries");
                let mut state = self.state.lock();
                if state.valid_until.is_none() {
                    state.valid_until = Some(Instant::now() + FAILED_LOAD_RETRY);
                }
            }
        }
    }

    /// Write every unpersisted entry, pruning expired ones
    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let pending: Vec<(String, DateTime<Utc>)> = self
            .state
            .lock()
            .unpersisted
            .iter()
            .map(|(jti, expires)| (jti.clone(), *expires))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut document = self.load_document().await?.unwrap_or_default();
        let now = Utc::now();
        for (jti, expires_at) in &pending {
            if !document.entries.iter().any(|e| &e.jti == jti) {
                document.entries.push(BlacklistEntry {
                    jti: jti.clone(),
                    expires_at: *expires_at,
                    revoked_at: now,
                });
            }
        }
        document.prune(now);
        self.store
            .write_json(&self.key, &serde_json::to_value(&document)?)
            .await?;

        let mut state = self.state.lock();
        for (jti, _) in pending {
            state.unpersisted.remove(&jti);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryObjectStore;
    use crate::config::StoreConfig;
    use crate::model::ModelRegistry;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn setup() -> (InMemoryObjectStore, Arc<DocumentStore>) {
        let backend = InMemoryObjectStore::new();
        let store = DocumentStore::from_factory(
            StoreConfig::builder("auth").build(),
            Arc::new(backend.clone()),
            Arc::new(ModelRegistry::new()),
        )
        .unwrap();
        (backend, Arc::new(store))
    }

    fn in_hours(hours: i64) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::hours(hours)
    }

    #[tokio::test]
    async fn test_add_persists_and_survives_restart() {
        let (_backend, store) = setup();
        let blacklist = TokenBlacklist::new(Arc::clone(&store));
        assert!(blacklist.add("jti-1", in_hours(1)).await);
        assert!(blacklist.is_blacklisted("jti-1").await);

        let fresh = TokenBlacklist::new(store);
        assert!(fresh.is_blacklisted("jti-1").await);
        assert!(!fresh.is_blacklisted("jti-2").await);
    }

    #[tokio::test]
    async fn test_expired_entries_are_ignored_and_pruned() {
        let (_backend, store) = setup();
        store
            .write_json(
                &store.config().system_key("token_blacklist.json"),
                &json!({"entries": [
                    {"jti": "old", "expires_at": in_hours(-1), "revoked_at": in_hours(-2)},
                    {"jti": "live", "expires_at": in_hours(1), "revoked_at": in_hours(-2)},
                ]}),
            )
            .await
            .unwrap();

        let blacklist = TokenBlacklist::new(store);
        assert!(!blacklist.is_blacklisted("old").await);
        assert!(blacklist.is_blacklisted("live").await);
        assert_eq!(blacklist.cleanup().await.unwrap(), 1);
        assert_eq!(blacklist.cleanup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_memory() {
        let (backend, store) = setup();
        let blacklist = TokenBlacklist::new(store).with_cache_ttl(Duration::ZERO);

        backend.set_read_only(true);
        assert!(!blacklist.add("jti-1", in_hours(1)).await);
        assert!(blacklist.is_blacklisted("jti-1").await);

        // A reload does not drop the unpersisted entry
        blacklist.clear_cache();
        assert!(blacklist.is_blacklisted("jti-1").await);

        // The next successful write flushes it
        backend.set_read_only(false);
        assert!(blacklist.add("jti-2", in_hours(1)).await);
        let stored = backend.bucket_data("auth");
        let body = &stored["_system/token_blacklist.json"];
        assert!(body.contains("jti-1") && body.contains("jti-2"));
    }

    #[tokio::test]
    async fn test_cleanup_without_object() {
        let (_backend, store) = setup();
        assert_eq!(TokenBlacklist::new(store).cleanup().await.unwrap(), 0);
    }
}
