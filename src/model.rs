//! Model definitions and the model registry
//!
//! A model names a family of records stored under one key prefix, the fields
//! they are validated against, and the relationships they declare.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::query::{SYSTEM_FIELDS, validate_field_name, validate_key_segment, validate_model_name};
use crate::relationships::Relationship;
use crate::types::FieldDefinition;

/// Static description of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Model name, used in cache keys and relationship targets
    pub name: String,
    /// Key prefix segment for the model's objects
    pub plural_name: String,
    /// Declared fields
    pub fields: Vec<FieldDefinition>,
    /// Declared relationships, in declaration order
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl ModelDefinition {
    /// Create a definition; the plural name is derived from the model name
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        let name = name.into();
        Self {
            plural_name: pluralize(&to_snake_case(&name)),
            name,
            fields,
            relationships: Vec::new(),
        }
    }

    /// Override the derived plural name
    pub fn with_plural_name(mut self, plural_name: impl Into<String>) -> Self {
        self.plural_name = plural_name.into();
        self
    }

    /// Add a relationship
    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Check names, duplicates and reserved fields
    pub fn validate(&self) -> Result<()> {
        validate_model_name(&self.name).map_err(StoreError::validation)?;
        validate_key_segment(&self.plural_name).map_err(StoreError::validation)?;

        let mut seen = HashSet::new();
        for field in &self.fields {
            validate_field_name(&field.name, SYSTEM_FIELDS)
                .map_err(|e| StoreError::model(&self.name, Some(&field.name), e))?;
            if !seen.insert(field.name.as_str()) {
                return Err(StoreError::model(
                    &self.name,
                    Some(&field.name),
                    format!("Field '{}' is declared twice", field.name),
                ));
            }
        }

        let mut rel_names = HashSet::new();
        for rel in &self.relationships {
            if !rel_names.insert(rel.name.as_str()) {
                return Err(StoreError::model(
                    &self.name,
                    None,
                    format!("Relationship '{}' is declared twice", rel.name),
                ));
            }
        }
        Ok(())
    }

    /// `<base_path><plural_name>/`
    pub fn key_prefix(&self, base_path: &str) -> String {
        format!("{}{}/", base_path, self.plural_name)
    }

    /// `<base_path><plural_name>/<id>.json`
    pub fn object_key(&self, base_path: &str, id: &Uuid) -> String {
        format!("{}{}.json", self.key_prefix(base_path), id)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.unique)
    }

    pub fn relationship(&self, name: &str) -> Result<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                StoreError::model(
                    &self.name,
                    None,
                    format!("Model '{}' has no relationship '{}'", self.name, name),
                )
            })
    }

    /// Strip system fields and fill in declared defaults for absent fields
    pub fn prepare_fields(&self, mut data: Map<String, Value>) -> Map<String, Value> {
        for system in SYSTEM_FIELDS {
            data.remove(*system);
        }
        for field in &self.fields {
            if let Some(default) = &field.default_value {
                data.entry(field.name.clone()).or_insert_with(|| default.clone());
            }
        }
        data
    }

    /// Validate every declared field. Undeclared fields pass through.
    pub fn validate_fields(&self, data: &Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            field
                .validate(data.get(&field.name))
                .map_err(|e| StoreError::field_validation(&field.name, e))?;
        }
        Ok(())
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    let consonant_y = word.ends_with('y')
        && !word.ends_with("ay")
        && !word.ends_with("ey")
        && !word.ends_with("oy")
        && !word.ends_with("uy");
    if consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

/// Explicit name -> definition map, populated at startup.
///
/// The string lookup only matters where the target type is not known until
/// runtime, such as relationship targets and migration targets.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<ModelDefinition>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a definition. Re-registering a name is an error.
    pub fn register(&self, definition: ModelDefinition) -> Result<Arc<ModelDefinition>> {
        definition.validate()?;
        let mut models = self.models.write();
        if models.contains_key(&definition.name) {
            return Err(StoreError::model(
                &definition.name,
                None,
                format!("Model '{}' is already registered", definition.name),
            ));
        }
        let plural_taken = models
            .values()
            .any(|m| m.plural_name == definition.plural_name);
        if plural_taken {
            return Err(StoreError::model(
                &definition.name,
                None,
                format!(
                    "Key prefix '{}' is already used by another model",
                    definition.plural_name
                ),
            ));
        }
        let definition = Arc::new(definition);
        models.insert(definition.name.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Register a typed model
    pub fn register_model<T: Model>(&self) -> Result<Arc<ModelDefinition>> {
        self.register(T::definition())
    }

    /// Look a model up by name
    pub fn get(&self, name: &str) -> Result<Arc<ModelDefinition>> {
        self.lookup(name)
            .ok_or_else(|| StoreError::UnknownModel(name.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ModelDefinition>> {
        self.models.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// A statically typed model.
///
/// The type holds the model's own fields only; the system fields live on
/// [`crate::repository::Entity`].
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    fn definition() -> ModelDefinition;
}
