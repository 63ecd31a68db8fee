//! Declarative migration files
//!
//! A migration file is a JSON object:
//!
//! ```json
//! {
//!   "version": "20240101_001",
//!   "description": "Add status to orders",
//!   "model_name": "Order",
//!   "reversible": true,
//!   "operations": [
//!     {"type": "add_field", "field": "status", "default": "pending"},
//!     {"type": "rename_field", "from": "total", "to": "total_cents"}
//!   ]
//! }
//! ```
//!
//! Only data-only operations can be declared; transforms that need code are
//! registered programmatically.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::migration::Migration;
use super::operations::{AddField, RemoveField, RenameField, RenameModel};
use super::runner::MigrationRunner;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationSpec {
    AddField {
        field: String,
        #[serde(default)]
        default: Value,
    },
    RemoveField {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Value>,
    },
    RenameField {
        from: String,
        to: String,
    },
    RenameModel {
        old_name: String,
        new_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFile {
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub model_name: String,
    #[serde(default = "default_reversible")]
    pub reversible: bool,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

fn default_reversible() -> bool {
    true
}

impl MigrationFile {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn into_migration(self) -> Migration {
        let mut migration = Migration::new(self.version, self.model_name, self.description);
        for op in self.operations {
            migration = match op {
                OperationSpec::AddField { field, default } => {
                    migration.operation(AddField::new(field, default))
                }
                OperationSpec::RemoveField { field, fallback } => {
                    let mut remove = RemoveField::new(field);
                    remove.fallback = fallback;
                    migration.operation(remove)
                }
                OperationSpec::RenameField { from, to } => {
                    migration.operation(RenameField::new(from, to))
                }
                OperationSpec::RenameModel { old_name, new_name } => {
                    migration.operation(RenameModel::new(old_name, new_name))
                }
            };
        }
        if !self.reversible {
            migration = migration.irreversible();
        }
        migration
    }
}

/// Read every `*.json` migration file in `dir`, in file name order.
///
/// Names starting with `_` are ignored. A missing directory yields nothing;
/// files that fail to read or parse are logged and skipped.
pub async fn load_migration_files(dir: &Path) -> Result<Vec<Migration>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::configuration(format!(
                "Cannot read migrations directory '{}': {}",
                dir.display(),
                e
            )));
        }
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        StoreError::configuration(format!("Cannot list '{}': {}", dir.display(), e))
    })? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('_') || !name.ends_with(".json") {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    let mut migrations = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read migration file");
                continue;
            }
        };
        match MigrationFile::parse(&raw) {
            Ok(file) => {
                debug!(path = %path.display(), version = %file.version, "Loaded migration file");
                migrations.push(file.into_migration());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to parse migration file"),
        }
    }
    migrations.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(migrations)
}

impl MigrationRunner {
    /// Register every migration file in `dir`; returns how many were added.
    ///
    /// Versions already registered are skipped with a warning.
    pub async fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut added = 0;
        for migration in load_migration_files(dir.as_ref()).await? {
            let version = migration.version.clone();
            match self.register(migration) {
                Ok(()) => added += 1,
                Err(e) => warn!(%version, error = %e, "Skipping migration file"),
            }
        }
        Ok(added)
    }
}
