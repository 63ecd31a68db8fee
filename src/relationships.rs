//! Relationship declarations, batched resolution and on-delete policies
//!
//! Joins are emulated: the resolver loads related records with one fetch per
//! distinct foreign key (or one scan for one-to-many), and the cascade handler
//! enforces on-delete policy before a record is removed.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ProtectedBy, Result, StoreError};
use crate::model::ModelDefinition;
use crate::query::Filters;
use crate::record::Record;
use crate::store::DocumentStore;

/// Upper bound on related records loaded for one-to-many resolution
pub const ONE_TO_MANY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
    /// Declared but unsupported; model it with a join model instead
    ManyToMany,
}

/// What happens to dependents when the referenced record is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    Cascade,
    SetNull,
    Protect,
    #[default]
    DoNothing,
}

/// A relationship declared on a model.
///
/// For `ManyToOne` and `OneToOne` the foreign key lives on the declaring
/// model; for `OneToMany` it lives on the related model and points back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub related_model: String,
    pub foreign_key: String,
    pub relation_type: RelationType,
    #[serde(default)]
    pub on_delete: OnDelete,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_populates: Option<String>,
}

impl Relationship {
    pub fn new(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            name: name.into(),
            related_model: related_model.into(),
            foreign_key: foreign_key.into(),
            relation_type,
            on_delete: OnDelete::DoNothing,
            back_populates: None,
        }
    }

    /// Many-to-one: `foreign_key` on this model holds the related id
    pub fn belongs_to(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(name, related_model, foreign_key, RelationType::ManyToOne)
    }

    /// One-to-many: `foreign_key` on the related model holds this record's id
    pub fn has_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
        on_delete: OnDelete,
    ) -> Self {
        Self::new(name, related_model, foreign_key, RelationType::OneToMany).on_delete(on_delete)
    }

    pub fn has_one(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
        on_delete: OnDelete,
    ) -> Self {
        Self::new(name, related_model, foreign_key, RelationType::OneToOne).on_delete(on_delete)
    }

    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        self.on_delete = policy;
        self
    }

    pub fn back_populates(mut self, name: impl Into<String>) -> Self {
        self.back_populates = Some(name.into());
        self
    }

    /// Whether on-delete policy applies to this relationship
    pub fn cascades(&self) -> bool {
        matches!(
            self.relation_type,
            RelationType::OneToMany | RelationType::OneToOne
        )
    }
}

/// Resolved value for one input record
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Record),
    Many(Vec<Record>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => Some(record),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Record] {
        match self {
            Related::One(record) => std::slice::from_ref(record),
            Related::Many(records) => records,
        }
    }
}

/// Batch loader for related records
pub struct RelationshipResolver<'a> {
    store: &'a DocumentStore,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(store: &'a DocumentStore) -> Self {
        Self { store }
    }

    /// Map each input record id to its related value.
    ///
    /// Many-to-one and one-to-one entries are absent when the foreign key is
    /// null or the target is missing. One-to-many gives every input record a
    /// list, possibly empty.
    pub async fn resolve(
        &self,
        records: &[Record],
        relationship: &Relationship,
    ) -> Result<HashMap<Uuid, Related>> {
        let related = self.store.registry().get(&relationship.related_model)?;

        match relationship.relation_type {
            RelationType::ManyToOne | RelationType::OneToOne => {
                self.resolve_single(records, relationship, &related).await
            }
            RelationType::OneToMany => self.resolve_many(records, relationship, &related).await,
            RelationType::ManyToMany => Err(many_to_many(relationship)),
        }
    }

    async fn resolve_single(
        &self,
        records: &[Record],
        relationship: &Relationship,
        related: &ModelDefinition,
    ) -> Result<HashMap<Uuid, Related>> {
        let mut targets = HashSet::new();
        for record in records {
            if let Some(fk) = record.uuid_field(&relationship.foreign_key) {
                targets.insert(fk);
            }
        }

        // Straight from the bucket; cached copies may lag behind writes
        let mut loaded = HashMap::with_capacity(targets.len());
        for id in targets {
            if let Some(target) = self.store.load_record(related, id).await? {
                loaded.insert(id, target);
            }
        }
        debug!(
            relationship = %relationship.name,
            fetched = loaded.len(),
            "Resolved single-valued relationship"
        );

        Ok(records
            .iter()
            .filter_map(|record| {
                let fk = record.uuid_field(&relationship.foreign_key)?;
                let target = loaded.get(&fk)?;
                Some((record.id, Related::One(target.clone())))
            })
            .collect())
    }

    async fn resolve_many(
        &self,
        records: &[Record],
        relationship: &Relationship,
        related: &ModelDefinition,
    ) -> Result<HashMap<Uuid, Related>> {
        let wanted: HashSet<Uuid> = records.iter().map(|r| r.id).collect();
        let children = self
            .store
            .engine()
            .list_by_prefix(related, ONE_TO_MANY_LIMIT)
            .await?;

        let mut grouped: HashMap<Uuid, Vec<Record>> = HashMap::new();
        for child in children {
            if let Some(parent) = child.uuid_field(&relationship.foreign_key)
                && wanted.contains(&parent)
            {
                grouped.entry(parent).or_default().push(child);
            }
        }

        for children in grouped.values_mut() {
            children.sort_by_key(|c| c.id);
        }

        Ok(records
            .iter()
            .map(|record| {
                let children = grouped.get(&record.id).cloned().unwrap_or_default();
                (record.id, Related::Many(children))
            })
            .collect())
    }
}

fn many_to_many(relationship: &Relationship) -> StoreError {
    StoreError::NotImplemented(format!(
        "many_to_many relationship '{}' is not supported; use a join model with two many_to_one relationships",
        relationship.name
    ))
}

/// Counts reported by a successful cascade
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub cascaded: usize,
    pub set_null: usize,
    /// Always empty on success; a protected delete fails with
    /// [`StoreError::Protected`] instead
    pub protected: Vec<ProtectedBy>,
}

/// Applies on-delete policy for a record about to be deleted.
///
/// Every `Protect` relationship is checked before anything is modified, so a
/// protected delete leaves the store untouched.
pub struct CascadeHandler<'a> {
    store: &'a DocumentStore,
}

impl<'a> CascadeHandler<'a> {
    pub fn new(store: &'a DocumentStore) -> Self {
        Self { store }
    }

    pub async fn handle_delete(
        &self,
        record: &Record,
        relationships: &[Relationship],
    ) -> Result<CascadeOutcome> {
        for relationship in relationships {
            if relationship.relation_type == RelationType::ManyToMany
                && relationship.on_delete != OnDelete::DoNothing
            {
                return Err(many_to_many(relationship));
            }
        }

        let mut pending = Vec::new();
        for relationship in relationships.iter().filter(|r| r.cascades()) {
            if relationship.on_delete == OnDelete::DoNothing {
                continue;
            }
            let related = self.store.registry().get(&relationship.related_model)?;
            let dependents = self.dependents(&related, relationship, record.id).await?;
            if !dependents.is_empty() {
                pending.push((relationship, related, dependents));
            }
        }

        let protected: Vec<ProtectedBy> = pending
            .iter()
            .filter(|(rel, _, _)| rel.on_delete == OnDelete::Protect)
            .map(|(rel, _, dependents)| ProtectedBy {
                relationship: rel.name.clone(),
                count: dependents.len(),
            })
            .collect();
        if !protected.is_empty() {
            return Err(StoreError::Protected(protected));
        }

        let mut outcome = CascadeOutcome::default();
        for (relationship, related, dependents) in pending {
            match relationship.on_delete {
                OnDelete::Cascade => {
                    for dependent in &dependents {
                        self.store.remove_record(&related, dependent.id).await?;
                        outcome.cascaded += 1;
                    }
                }
                OnDelete::SetNull => {
                    for mut dependent in dependents {
                        dependent
                            .fields
                            .insert(relationship.foreign_key.clone(), Value::Null);
                        dependent.updated_at = Utc::now();
                        self.store.write_record(&related, &dependent).await?;
                        outcome.set_null += 1;
                    }
                }
                OnDelete::Protect | OnDelete::DoNothing => {}
            }
            debug!(
                relationship = %relationship.name,
                policy = ?relationship.on_delete,
                "Applied on-delete policy"
            );
        }
        Ok(outcome)
    }

    async fn dependents(
        &self,
        related: &ModelDefinition,
        relationship: &Relationship,
        id: Uuid,
    ) -> Result<Vec<Record>> {
        let filters: Filters = [(
            relationship.foreign_key.clone(),
            Value::String(id.to_string()),
        )]
        .into_iter()
        .collect();
        self.store.engine().find(related, &filters).await
    }
}
