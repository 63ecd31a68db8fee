//! Versioned migrations and the applied-migration history

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operations::{Document, MigrationContext, MigrationOperation};
use crate::error::{Result, StoreError};

/// An ordered list of operations applied to every document of one model.
///
/// Versions are compared as plain strings, so choose a scheme that sorts
/// lexicographically (`001`, `20240101_001`).
#[derive(Clone)]
pub struct Migration {
    pub version: String,
    pub description: String,
    pub model_name: String,
    pub operations: Vec<Arc<dyn MigrationOperation>>,
    pub reversible: bool,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("model_name", &self.model_name)
            .field("operations", &self.operations)
            .field("reversible", &self.reversible)
            .finish()
    }
}

impl Migration {
    pub fn new(
        version: impl Into<String>,
        model_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            model_name: model_name.into(),
            operations: Vec::new(),
            reversible: true,
        }
    }

    /// Append an operation
    pub fn operation(mut self, operation: impl MigrationOperation + 'static) -> Self {
        self.operations.push(Arc::new(operation));
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    /// Fold `forward` over the operations in declared order
    pub fn apply(&self, document: &Document, ctx: &mut MigrationContext) -> Result<Document> {
        let mut current = document.clone();
        for op in &self.operations {
            current = op.forward(&current, ctx)?;
        }
        Ok(current)
    }

    /// Fold `reverse` over the operations in reverse order.
    ///
    /// Fails before touching the document if the migration or any of its
    /// operations cannot be reversed.
    pub fn rollback(&self, document: &Document, ctx: &MigrationContext) -> Result<Document> {
        self.check_reversible()?;
        let mut current = document.clone();
        for op in self.operations.iter().rev() {
            current = op.reverse(&current, ctx)?;
        }
        Ok(current)
    }

    pub fn check_reversible(&self) -> Result<()> {
        if !self.reversible {
            return Err(StoreError::migration(format!(
                "Migration '{}' is not reversible",
                self.version
            )));
        }
        if let Some(op) = self.operations.iter().find(|op| !op.is_reversible()) {
            return Err(StoreError::migration(format!(
                "Migration '{}' cannot be rolled back: {} has no reverse",
                self.version,
                op.describe()
            )));
        }
        Ok(())
    }
}

/// One applied (or skipped) migration, as persisted in the history object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: String,
    pub model_name: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub objects_transformed: usize,
}

impl MigrationRecord {
    pub fn new(migration: &Migration, objects_transformed: usize) -> Self {
        Self {
            version: migration.version.clone(),
            model_name: migration.model_name.clone(),
            description: migration.description.clone(),
            applied_at: Utc::now(),
            objects_transformed,
        }
    }
}

/// Body of `_system/migration_history.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationHistory {
    #[serde(default)]
    pub records: Vec<MigrationRecord>,
}

impl MigrationHistory {
    pub fn contains(&self, version: &str) -> bool {
        self.records.iter().any(|r| r.version == version)
    }

    pub fn versions(&self) -> Vec<String> {
        self.records.iter().map(|r| r.version.clone()).collect()
    }

    /// Append unless the version is already recorded
    pub fn push(&mut self, record: MigrationRecord) -> bool {
        if self.contains(&record.version) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Drop a version entirely; returns whether it was present
    pub fn remove(&mut self, version: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.version != version);
        self.records.len() != before
    }
}
