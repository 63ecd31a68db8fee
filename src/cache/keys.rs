//! Cache key derivation
//!
//! Keys are colon-delimited: `<prefix>:model:<Model>:<id>`,
//! `<prefix>:list:<Model>:<hash>` and `<prefix>:count:<Model>:<hash|all>`.
//! Query hashes are the first 16 hex chars of SHA-256 over canonical JSON
//! with object keys sorted, so filter construction order never matters.

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::query::{Filters, SortOrder};

#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new("s3v")
    }
}

impl CacheKeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn model_key(&self, model: &str, id: &str) -> String {
        format!("{}:model:{}:{}", self.prefix, model, id)
    }

    pub fn model_list_key(
        &self,
        model: &str,
        filters: &Filters,
        sort_field: Option<&str>,
        sort_order: SortOrder,
        page: usize,
        page_size: usize,
    ) -> String {
        let query = json!({
            "filters": filters,
            "sort_field": sort_field,
            "sort_order": sort_order,
            "page": page,
            "page_size": page_size,
        });
        format!("{}:list:{}:{}", self.prefix, model, short_hash(&query))
    }

    pub fn model_count_key(&self, model: &str, filters: &Filters) -> String {
        if filters.is_empty() {
            return format!("{}:count:{}:all", self.prefix, model);
        }
        let hash = short_hash(&json!(filters));
        format!("{}:count:{}:{}", self.prefix, model, hash)
    }

    /// Everything cached for a model
    pub fn model_pattern(&self, model: &str) -> String {
        format!("{}:*:{}:*", self.prefix, model)
    }

    pub fn model_instance_pattern(&self, model: &str) -> String {
        format!("{}:model:{}:*", self.prefix, model)
    }

    pub fn model_list_pattern(&self, model: &str) -> String {
        format!("{}:list:{}:*", self.prefix, model)
    }

    pub fn model_count_pattern(&self, model: &str) -> String {
        format!("{}:count:{}:*", self.prefix, model)
    }

    pub fn custom_key(&self, parts: &[&str]) -> String {
        format!("{}:{}", self.prefix, parts.join(":"))
    }
}

fn short_hash(value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Rebuild every object with its keys in sorted order
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
