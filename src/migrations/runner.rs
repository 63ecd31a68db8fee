//! Applies registered migrations to stored documents
//!
//! History is kept in one object, `<base_path>_system/migration_history.json`.
//! Neither applying nor rolling back is transactional: a crash midway leaves
//! a mix of transformed and untransformed documents, and the migration is
//! re-run as a whole.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::migration::{Migration, MigrationHistory, MigrationRecord};
use super::operations::{Document, MigrationContext};
use crate::error::{Result, StoreError};
use crate::model::ModelDefinition;
use crate::store::DocumentStore;

const HISTORY_OBJECT: &str = "migration_history.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Applied,
    Skipped,
    RolledBack,
}

/// Result of applying or rolling back one migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub version: String,
    pub description: String,
    pub status: MigrationStatus,
    pub objects_transformed: usize,
    /// Objects skipped because they could not be loaded, transformed or written
    pub objects_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Reverse,
}

#[derive(Default)]
struct PassCounts {
    transformed: usize,
    failed: usize,
}

/// Removed values captured by the latest apply of each version
#[derive(Default)]
struct RunState {
    contexts: HashMap<String, MigrationContext>,
}

pub struct MigrationRunner {
    store: Arc<DocumentStore>,
    migrations: RwLock<Vec<Arc<Migration>>>,
    /// Serializes runs and rollbacks within the process
    state: Mutex<RunState>,
    context_capacity: usize,
}

impl MigrationRunner {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            migrations: RwLock::new(Vec::new()),
            state: Mutex::new(RunState::default()),
            context_capacity: MigrationContext::DEFAULT_CAPACITY,
        }
    }

    /// Bound on removed values kept per run for rollback
    pub fn with_context_capacity(mut self, capacity: usize) -> Self {
        self.context_capacity = capacity;
        self
    }

    pub fn history_key(&self) -> String {
        self.store.config().system_key(HISTORY_OBJECT)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Add a migration; the list stays sorted by version
    pub fn register(&self, migration: Migration) -> Result<()> {
        let mut migrations = self.migrations.write();
        if migrations.iter().any(|m| m.version == migration.version) {
            return Err(StoreError::migration(format!(
                "Migration '{}' is already registered",
                migration.version
            )));
        }
        migrations.push(Arc::new(migration));
        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(())
    }

    /// Registered migrations in version order
    pub fn migrations(&self) -> Vec<Arc<Migration>> {
        self.migrations.read().clone()
    }

    fn find(&self, version: &str) -> Option<Arc<Migration>> {
        self.migrations
            .read()
            .iter()
            .find(|m| m.version == version)
            .cloned()
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Persisted history; empty when the object does not exist yet.
    ///
    /// An unreadable or corrupt history is an error, so a run never mistakes
    /// it for "nothing applied".
    pub async fn history(&self) -> Result<MigrationHistory> {
        match self.store.read_json(&self.history_key()).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                StoreError::migration(format!("Migration history is corrupt: {}", e))
            }),
            None => Ok(MigrationHistory::default()),
        }
    }

    pub async fn applied_versions(&self) -> Result<Vec<String>> {
        Ok(self.history().await?.versions())
    }

    /// Registered migrations not yet in the history
    pub async fn pending(&self) -> Result<Vec<Arc<Migration>>> {
        let history = self.history().await?;
        Ok(self
            .migrations()
            .into_iter()
            .filter(|m| !history.contains(&m.version))
            .collect())
    }

    async fn save_history(&self, history: &MigrationHistory) -> Result<()> {
        self.store
            .write_json(&self.history_key(), &serde_json::to_value(history)?)
            .await
    }

    async fn record_applied(&self, record: MigrationRecord) -> Result<()> {
        let mut history = self.history().await?;
        history.push(record);
        self.save_history(&history).await
    }

    async fn remove_applied(&self, version: &str) -> Result<()> {
        let mut history = self.history().await?;
        if history.remove(version) {
            self.save_history(&history).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Running
    // =========================================================================

    /// Apply every pending migration in version order.
    ///
    /// A migration whose model is not registered is recorded as skipped so it
    /// is not retried. Documents that fail to transform are logged and
    /// skipped without aborting the migration.
    pub async fn run_pending(&self) -> Result<Vec<MigrationOutcome>> {
        let mut state = self.state.lock().await;
        let pending = self.pending().await?;
        let mut outcomes = Vec::with_capacity(pending.len());

        for migration in pending {
            let Some(def) = self.store.registry().lookup(&migration.model_name) else {
                self.record_applied(MigrationRecord::new(&migration, 0)).await?;
                let reason = format!("Model '{}' not found", migration.model_name);
                info!(version = %migration.version, %reason, "Skipped migration");
                outcomes.push(MigrationOutcome {
                    version: migration.version.clone(),
                    description: migration.description.clone(),
                    status: MigrationStatus::Skipped,
                    objects_transformed: 0,
                    objects_failed: 0,
                    reason: Some(reason),
                });
                continue;
            };

            let mut ctx = MigrationContext::with_capacity(self.context_capacity);
            let counts = self
                .transform_all(&def, &migration, Direction::Forward, &mut ctx)
                .await?;
            self.record_applied(MigrationRecord::new(&migration, counts.transformed))
                .await?;
            state.contexts.insert(migration.version.clone(), ctx);

            info!(
                version = %migration.version,
                model = %def.name,
                transformed = counts.transformed,
                failed = counts.failed,
                "Applied migration"
            );
            outcomes.push(MigrationOutcome {
                version: migration.version.clone(),
                description: migration.description.clone(),
                status: MigrationStatus::Applied,
                objects_transformed: counts.transformed,
                objects_failed: counts.failed,
                reason: None,
            });
        }
        Ok(outcomes)
    }

    /// Reverse an applied migration and remove it from the history.
    ///
    /// Values dropped by `RemoveField` come back only if this runner applied
    /// the migration; otherwise the operation's fallback is used.
    pub async fn rollback(&self, version: &str) -> Result<MigrationOutcome> {
        let mut state = self.state.lock().await;
        let migration = self
            .find(version)
            .ok_or_else(|| StoreError::migration(format!("Migration '{}' not found", version)))?;
        migration.check_reversible()?;

        if !self.history().await?.contains(version) {
            return Err(StoreError::migration(format!(
                "Migration '{}' has not been applied",
                version
            )));
        }

        let mut counts = PassCounts::default();
        if let Some(def) = self.store.registry().lookup(&migration.model_name) {
            let mut ctx = state.contexts.remove(version).unwrap_or_default();
            counts = self
                .transform_all(&def, &migration, Direction::Reverse, &mut ctx)
                .await?;
        }
        self.remove_applied(version).await?;

        info!(
            version,
            transformed = counts.transformed,
            failed = counts.failed,
            "Rolled back migration"
        );
        Ok(MigrationOutcome {
            version: migration.version.clone(),
            description: migration.description.clone(),
            status: MigrationStatus::RolledBack,
            objects_transformed: counts.transformed,
            objects_failed: counts.failed,
            reason: None,
        })
    }

    /// Page through every object under the model prefix and rewrite it in place
    async fn transform_all(
        &self,
        def: &ModelDefinition,
        migration: &Migration,
        direction: Direction,
        ctx: &mut MigrationContext,
    ) -> Result<PassCounts> {
        let config = self.store.config();
        let prefix = def.key_prefix(&config.base_path);
        let client = self.store.pool().acquire().await?;
        let mut counts = PassCounts::default();
        let mut token: Option<String> = None;

        loop {
            let page = client
                .list_objects(&config.bucket, &prefix, config.list_page_size, token.as_deref())
                .await?;

            for key in page.keys.iter().filter(|k| k.ends_with(".json")) {
                let document = match client.get_object(&config.bucket, key).await {
                    Ok(body) => match serde_json::from_slice::<Document>(&body) {
                        Ok(document) => document,
                        Err(e) => {
                            warn!(key = %key, version = %migration.version, error = %e, "Skipping unparsable object");
                            counts.failed += 1;
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!(key = %key, version = %migration.version, error = %e, "Failed to load object");
                        counts.failed += 1;
                        continue;
                    }
                };

                let transformed = match direction {
                    Direction::Forward => migration.apply(&document, ctx),
                    Direction::Reverse => migration.rollback(&document, ctx),
                };
                let transformed = match transformed {
                    Ok(doc) => doc,
                    Err(e) => {
                        error!(key = %key, version = %migration.version, error = %e, "Migration failed on object");
                        counts.failed += 1;
                        continue;
                    }
                };

                let body = Bytes::from(serde_json::to_vec(&Value::Object(transformed))?);
                match client
                    .put_object(&config.bucket, key, body, "application/json")
                    .await
                {
                    Ok(()) => counts.transformed += 1,
                    Err(e) => {
                        error!(key = %key, version = %migration.version, error = %e, "Failed to write migrated object");
                        counts.failed += 1;
                    }
                }
            }

            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }
        drop(client);

        self.store.invalidate_model(&def.name).await;
        Ok(counts)
    }
}
