//! DocumentStore - Main entry point for object-storage-backed records
//!
//! This module provides the `DocumentStore` service that turns a bucket into a
//! record store: cache-first reads, validated writes with cache invalidation,
//! in-memory queries over prefix listings, and on-delete policy enforcement.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheBackend, CacheKeyBuilder};
use crate::client::{ClientPool, ConnectionFactory};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::model::{ModelDefinition, ModelRegistry};
use crate::query::{Filters, QueryEngine, SYSTEM_FIELDS};
use crate::record::{ListQuery, QueryResult, Record};
use crate::relationships::{CascadeHandler, CascadeOutcome, Related, RelationshipResolver};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Record store over an object storage bucket
///
/// Records of a model live at `<base_path><plural_name>/<id>.json`.
/// Concurrent writes to the same record are last-write-wins; there is no
/// version check.
pub struct DocumentStore {
    /// Store configuration
    config: StoreConfig,
    /// Client pool shared with the query engine
    pool: ClientPool,
    /// Registered models
    registry: Arc<ModelRegistry>,
    /// Optional cache tier fronting reads
    cache: Option<Arc<dyn CacheBackend>>,
    keys: CacheKeyBuilder,
    engine: QueryEngine,
}

impl DocumentStore {
    /// Create a store over an existing pool
    pub fn new(config: StoreConfig, pool: ClientPool, registry: Arc<ModelRegistry>) -> Result<Self> {
        config.validate()?;
        let engine = QueryEngine::new(pool.clone(), &config);
        let keys = CacheKeyBuilder::new(config.cache_prefix.clone());
        Ok(Self {
            config,
            pool,
            registry,
            cache: None,
            keys,
            engine,
        })
    }

    /// Create a store with its own pool built from `config.pool`
    pub fn from_factory(
        config: StoreConfig,
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<ModelRegistry>,
    ) -> Result<Self> {
        let pool = ClientPool::new(factory, config.pool.clone());
        Self::new(config, pool, registry)
    }

    /// Put a cache tier in front of reads
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn key_builder(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    fn active_cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.cache.as_ref().filter(|_| self.config.cache_enabled)
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Create a record
    ///
    /// This will:
    /// 1. Strip system fields from `data` and apply field defaults
    /// 2. Validate declared fields and unique constraints
    /// 3. Write the object and invalidate the model's cached queries
    pub async fn create(&self, model: &str, data: Value) -> Result<Record> {
        let def = self.registry.get(model)?;
        let fields = def.prepare_fields(into_object(data)?);
        def.validate_fields(&fields)?;
        self.check_unique(&def, &fields, None).await?;

        let record = Record::new(fields);
        self.put_record(&def, &record).await?;
        self.invalidate_queries(&def.name).await;
        self.cache_record(&def.name, &record).await;

        info!(model = %def.name, id = %record.id, "Created record");
        Ok(record)
    }

    /// Get a record by id, cache first
    pub async fn get(&self, model: &str, id: Uuid) -> Result<Option<Record>> {
        let def = self.registry.get(model)?;
        let cache_key = self.keys.model_key(&def.name, &id.to_string());

        if let Some(value) = self.cache_get(&cache_key).await {
            match value {
                Value::Object(document) => match Record::from_document(document) {
                    Ok(record) => return Ok(Some(record)),
                    Err(e) => warn!(key = %cache_key, error = %e, "Undecodable cache entry"),
                },
                _ => warn!(key = %cache_key, "Cache entry is not a record"),
            }
        }

        let record = self.load_record(&def, id).await?;
        if let Some(record) = &record {
            self.cache_record(&def.name, record).await;
        }
        Ok(record)
    }

    /// Merge `patch` into a record
    ///
    /// `id` and `created_at` never change; `updated_at` is refreshed.
    pub async fn update(&self, model: &str, id: Uuid, patch: Value) -> Result<Record> {
        let def = self.registry.get(model)?;
        let mut patch = into_object(patch)?;
        for system in SYSTEM_FIELDS {
            patch.remove(*system);
        }

        let mut record = self
            .load_record(&def, id)
            .await?
            .ok_or_else(|| StoreError::record_not_found(&def.name, id))?;
        record.fields.extend(patch);
        def.validate_fields(&record.fields)?;
        self.check_unique(&def, &record.fields, Some(id)).await?;

        record.updated_at = Utc::now();
        self.write_record(&def, &record).await?;

        info!(model = %def.name, id = %id, "Updated record");
        Ok(record)
    }

    /// Delete a record after applying the on-delete policy of its relationships
    ///
    /// A `Protect` relationship with dependents fails the whole delete with
    /// [`StoreError::Protected`] before anything is modified.
    pub async fn delete(&self, model: &str, id: Uuid) -> Result<CascadeOutcome> {
        let def = self.registry.get(model)?;
        let record = self
            .load_record(&def, id)
            .await?
            .ok_or_else(|| StoreError::record_not_found(&def.name, id))?;

        let outcome = CascadeHandler::new(self)
            .handle_delete(&record, &def.relationships)
            .await?;
        self.remove_record(&def, id).await?;

        info!(
            model = %def.name,
            id = %id,
            cascaded = outcome.cascaded,
            set_null = outcome.set_null,
            "Deleted record"
        );
        Ok(outcome)
    }

    /// Whether the record's object exists, without fetching it
    pub async fn exists(&self, model: &str, id: Uuid) -> Result<bool> {
        let def = self.registry.get(model)?;
        let client = self.pool.acquire().await?;
        match client
            .head_object(&self.config.bucket, &def.object_key(&self.config.base_path, &id))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Query Operations
    // =========================================================================

    /// List one page of records, cache first
    pub async fn list(&self, model: &str, query: &ListQuery) -> Result<QueryResult> {
        let def = self.registry.get(model)?;
        let page_size = query.page_size.unwrap_or(self.config.default_page_size);
        let cache_key = self.keys.model_list_key(
            &def.name,
            &query.filters,
            query.sort_field.as_deref(),
            query.sort_order,
            query.page,
            page_size,
        );

        if let Some(value) = self.cache_get(&cache_key).await {
            match serde_json::from_value::<QueryResult>(value) {
                Ok(result) => return Ok(result),
                Err(e) => warn!(key = %cache_key, error = %e, "Undecodable cache entry"),
            }
        }

        let result = self.engine.list(&def, query).await?;
        match serde_json::to_value(&result) {
            Ok(value) => self.cache_set(&cache_key, value, self.config.cache.list_ttl).await,
            Err(e) => warn!(key = %cache_key, error = %e, "Could not cache list result"),
        }
        Ok(result)
    }

    /// Count records matching `filters`, cache first
    pub async fn count(&self, model: &str, filters: &Filters) -> Result<usize> {
        let def = self.registry.get(model)?;
        let cache_key = self.keys.model_count_key(&def.name, filters);

        if let Some(value) = self.cache_get(&cache_key).await {
            if let Some(count) = value.as_u64().and_then(|c| usize::try_from(c).ok()) {
                return Ok(count);
            }
            warn!(key = %cache_key, "Cache entry is not a count");
        }

        let count = self.engine.count(&def, filters).await?;
        self.cache_set(&cache_key, Value::from(count), self.config.cache.list_ttl)
            .await;
        Ok(count)
    }

    /// Batch-load a relationship for a set of records of `model`
    pub async fn prefetch(
        &self,
        model: &str,
        records: &[Record],
        relationship: &str,
    ) -> Result<HashMap<Uuid, Related>> {
        let def = self.registry.get(model)?;
        let relationship = def.relationship(relationship)?;
        RelationshipResolver::new(self)
            .resolve(records, relationship)
            .await
    }

    // =========================================================================
    // Raw Objects
    // =========================================================================

    /// Read a JSON object by key; `None` when it does not exist
    pub async fn read_json(&self, key: &str) -> Result<Option<Value>> {
        let client = self.pool.acquire().await?;
        match client.get_object(&self.config.bucket, key).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a JSON object by key, bypassing model validation and the cache
    pub async fn write_json(&self, key: &str, value: &Value) -> Result<()> {
        let body = Bytes::from(serde_json::to_vec(value)?);
        let client = self.pool.acquire().await?;
        client
            .put_object(&self.config.bucket, key, body, JSON_CONTENT_TYPE)
            .await
    }

    pub async fn delete_key(&self, key: &str) -> Result<()> {
        let client = self.pool.acquire().await?;
        client.delete_object(&self.config.bucket, key).await
    }

    // =========================================================================
    // Cache Invalidation
    // =========================================================================

    /// Drop every cached list and count result for a model
    pub async fn invalidate_queries(&self, model: &str) {
        for pattern in [
            self.keys.model_list_pattern(model),
            self.keys.model_count_pattern(model),
        ] {
            self.cache_delete_pattern(&pattern).await;
        }
    }

    /// Drop everything cached for a model
    pub async fn invalidate_model(&self, model: &str) {
        self.cache_delete_pattern(&self.keys.model_pattern(model)).await;
    }

    async fn invalidate_record(&self, model: &str, id: Uuid) {
        let Some(cache) = self.active_cache() else {
            return;
        };
        let key = self.keys.model_key(model, &id.to_string());
        if let Err(e) = cache.delete(&key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
        }
        self.invalidate_queries(model).await;
    }

    async fn cache_get(&self, key: &str) -> Option<Value> {
        let cache = self.active_cache()?;
        match cache.get(key).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(key, "Cache miss");
                }
                found
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed; falling back to store");
                None
            }
        }
    }

    async fn cache_set(&self, key: &str, value: Value, ttl: Option<std::time::Duration>) {
        if let Some(cache) = self.active_cache()
            && let Err(e) = cache.set(key, value, ttl).await
        {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn cache_record(&self, model: &str, record: &Record) {
        let key = self.keys.model_key(model, &record.id.to_string());
        self.cache_set(&key, Value::Object(record.to_document()), self.config.cache.default_ttl)
            .await;
    }

    async fn cache_delete_pattern(&self, pattern: &str) {
        let Some(cache) = self.active_cache() else {
            return;
        };
        match cache.delete_pattern(pattern).await {
            Ok(count) => debug!(pattern, count, "Invalidated cache entries"),
            Err(StoreError::NotImplemented(_)) => {
                debug!(pattern, "Cache backend has no pattern deletion; clearing it");
                if let Err(e) = cache.clear().await {
                    warn!(pattern, error = %e, "Cache clear failed");
                }
            }
            Err(e) => warn!(pattern, error = %e, "Cache invalidation failed"),
        }
    }

    // =========================================================================
    // Internal Record I/O
    // =========================================================================

    /// Authoritative read, bypassing the cache
    pub(crate) async fn load_record(&self, def: &ModelDefinition, id: Uuid) -> Result<Option<Record>> {
        let key = def.object_key(&self.config.base_path, &id);
        match self.read_json(&key).await? {
            Some(Value::Object(document)) => Record::from_document(document).map(Some),
            Some(_) => Err(StoreError::validation(format!(
                "Object at '{}' is not a JSON object",
                key
            ))),
            None => Ok(None),
        }
    }

    /// Persist a record and invalidate its cache entries
    pub(crate) async fn write_record(&self, def: &ModelDefinition, record: &Record) -> Result<()> {
        self.put_record(def, record).await?;
        self.invalidate_record(&def.name, record.id).await;
        Ok(())
    }

    /// Delete a record's object and its cache entries
    pub(crate) async fn remove_record(&self, def: &ModelDefinition, id: Uuid) -> Result<()> {
        self.delete_key(&def.object_key(&self.config.base_path, &id))
            .await?;
        self.invalidate_record(&def.name, id).await;
        Ok(())
    }

    async fn put_record(&self, def: &ModelDefinition, record: &Record) -> Result<()> {
        let key = def.object_key(&self.config.base_path, &record.id);
        self.write_json(&key, &Value::Object(record.to_document()))
            .await
    }

    async fn check_unique(
        &self,
        def: &ModelDefinition,
        fields: &Map<String, Value>,
        current: Option<Uuid>,
    ) -> Result<()> {
        for field in def.unique_fields() {
            let Some(value) = fields.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let filters: Filters = [(field.name.clone(), value.clone())].into_iter().collect();
            let holders = self.engine.find(def, &filters).await?;
            if holders.iter().any(|r| Some(r.id) != current) {
                return Err(StoreError::model(
                    &def.name,
                    Some(&field.name),
                    format!("unique constraint violated: value for '{}' already exists", field.name),
                ));
            }
        }
        Ok(())
    }
}

fn into_object(data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::validation(format!(
            "Record data must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::client::InMemoryObjectStore;
    use crate::relationships::{OnDelete, RelationType, Relationship};
    use crate::types::{FieldDefinition, FieldType};
    use serde_json::json;

    fn store_with(registry: ModelRegistry) -> (InMemoryObjectStore, DocumentStore) {
        let backend = InMemoryObjectStore::new();
        let config = StoreConfig::builder("data").build();
        let store = DocumentStore::from_factory(config, Arc::new(backend.clone()), Arc::new(registry))
            .unwrap()
            .with_cache(Arc::new(LruCache::default()));
        (backend, store)
    }

    fn catalog() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry
            .register(
                ModelDefinition::new(
                    "Product",
                    vec![
                        FieldDefinition::new("sku", FieldType::String).not_null().unique(),
                        FieldDefinition::new("price", FieldType::Float),
                        FieldDefinition::new("active", FieldType::Boolean).default(true),
                    ],
                )
                .with_relationship(Relationship::has_many(
                    "reviews",
                    "Review",
                    "product_id",
                    OnDelete::Cascade,
                )),
            )
            .unwrap();
        registry
            .register(
                ModelDefinition::new("Review", vec![FieldDefinition::new("product_id", FieldType::Uuid)])
                    .with_relationship(Relationship::belongs_to("product", "Product", "product_id")),
            )
            .unwrap();
        registry
    }

    // =========================================================================
    // CRUD Tests
    // =========================================================================

    #[tokio::test]
    async fn test_create_and_get() {
        let (backend, store) = store_with(catalog());
        let created = store
            .create("Product", json!({"sku": "A-1", "price": 9.5, "id": "ignored"}))
            .await
            .unwrap();

        assert_eq!(created.get("active"), Some(&json!(true)));
        assert_eq!(backend.object_count("data", "products/"), 1);

        let fetched = store.get("Product", created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.get("sku"), Some(&json!("A-1")));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_backend, store) = store_with(catalog());
        assert!(store.get("Product", Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_served_from_cache() {
        let (backend, store) = store_with(catalog());
        let created = store.create("Product", json!({"sku": "A-1"})).await.unwrap();

        backend.clear();
        let cached = store.get("Product", created.id).await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_data() {
        let (_backend, store) = store_with(catalog());
        let err = store.create("Product", json!({"price": 1.0})).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        assert!(store.create("Product", json!([1, 2])).await.is_err());
        assert!(matches!(
            store.create("Ghost", json!({})).await.unwrap_err(),
            StoreError::UnknownModel(_)
        ));
    }

    #[tokio::test]
    async fn test_unique_constraint() {
        let (_backend, store) = store_with(catalog());
        let first = store.create("Product", json!({"sku": "A-1"})).await.unwrap();
        let err = store.create("Product", json!({"sku": "A-1"})).await.unwrap_err();
        assert!(matches!(err, StoreError::Model { field: Some(ref f), .. } if f == "sku"));
        assert!(err.hint().unwrap().contains("sku"));

        // Updating a record to its own value is fine
        store
            .update("Product", first.id, json!({"sku": "A-1", "price": 2.0}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_identity() {
        let (_backend, store) = store_with(catalog());
        let created = store
            .create("Product", json!({"sku": "A-1", "price": 1.0}))
            .await
            .unwrap();

        let updated = store
            .update(
                "Product",
                created.id,
                json!({"price": 2.0, "id": Uuid::new_v4().to_string(), "created_at": "1999-01-01T00:00:00Z"}),
            )
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.get("sku"), Some(&json!("A-1")));
        assert_eq!(updated.get("price"), Some(&json!(2.0)));

        let fetched = store.get("Product", created.id).await.unwrap().unwrap();
        assert_eq!(fetched.get("price"), Some(&json!(2.0)));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let (_backend, store) = store_with(catalog());
        let err = store
            .update("Product", Uuid::new_v4(), json!({"price": 1.0}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let (_backend, store) = store_with(catalog());
        let created = store.create("Product", json!({"sku": "A-1"})).await.unwrap();
        assert!(store.exists("Product", created.id).await.unwrap());

        store.delete("Product", created.id).await.unwrap();
        assert!(!store.exists("Product", created.id).await.unwrap());
        assert!(store.get("Product", created.id).await.unwrap().is_none());
        assert!(store.delete("Product", created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (backend, store) = store_with(catalog());
        let product = store.create("Product", json!({"sku": "A-1"})).await.unwrap();
        for _ in 0..3 {
            store
                .create("Review", json!({"product_id": product.id.to_string()}))
                .await
                .unwrap();
        }

        let outcome = store.delete("Product", product.id).await.unwrap();
        assert_eq!(outcome.cascaded, 3);
        assert_eq!(backend.object_count("data", "reviews/"), 0);
    }

    // =========================================================================
    // Query Tests
    // =========================================================================

    #[tokio::test]
    async fn test_list_and_count_invalidate_on_write() {
        let (_backend, store) = store_with(catalog());
        store.create("Product", json!({"sku": "A"})).await.unwrap();

        assert_eq!(store.count("Product", &Filters::new()).await.unwrap(), 1);
        assert_eq!(store.list("Product", &ListQuery::new()).await.unwrap().total, 1);

        store.create("Product", json!({"sku": "B"})).await.unwrap();
        assert_eq!(store.count("Product", &Filters::new()).await.unwrap(), 2);
        assert_eq!(store.list("Product", &ListQuery::new()).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_prefetch_many_to_one() {
        let (_backend, store) = store_with(catalog());
        let product = store.create("Product", json!({"sku": "A"})).await.unwrap();
        let linked = store
            .create("Review", json!({"product_id": product.id.to_string()}))
            .await
            .unwrap();
        let orphan = store.create("Review", json!({"product_id": null})).await.unwrap();

        let related = store
            .prefetch("Review", &[linked.clone(), orphan.clone()], "product")
            .await
            .unwrap();
        assert_eq!(related[&linked.id].as_one().map(|r| r.id), Some(product.id));
        assert!(!related.contains_key(&orphan.id));
    }

    #[tokio::test]
    async fn test_prefetch_one_to_many_gives_every_record_a_list() {
        let (_backend, store) = store_with(catalog());
        let with_reviews = store.create("Product", json!({"sku": "A"})).await.unwrap();
        let without = store.create("Product", json!({"sku": "B"})).await.unwrap();
        for _ in 0..2 {
            store
                .create("Review", json!({"product_id": with_reviews.id.to_string()}))
                .await
                .unwrap();
        }

        let related = store
            .prefetch("Product", &[with_reviews.clone(), without.clone()], "reviews")
            .await
            .unwrap();
        assert_eq!(related[&with_reviews.id].as_many().len(), 2);
        assert!(related[&without.id].as_many().is_empty());
    }

    #[tokio::test]
    async fn test_prefetch_reads_past_stale_cache() {
        let (_backend, store) = store_with(catalog());
        let product = store.create("Product", json!({"sku": "A"})).await.unwrap();
        let review = store
            .create("Review", json!({"product_id": product.id.to_string()}))
            .await
            .unwrap();
        store.get("Product", product.id).await.unwrap();

        // Rewrite the object behind the cache's back
        let def = store.registry().get("Product").unwrap();
        let mut document = product.to_document();
        document.insert("sku".to_string(), json!("B"));
        store
            .write_json(
                &def.object_key(&store.config().base_path, &product.id),
                &Value::Object(document),
            )
            .await
            .unwrap();

        let related = store.prefetch("Review", &[review.clone()], "product").await.unwrap();
        let target = related[&review.id].as_one().unwrap();
        assert_eq!(target.get("sku"), Some(&json!("B")));
    }

    #[tokio::test]
    async fn test_count_treats_bad_cache_entry_as_miss() {
        let (_backend, store) = store_with(catalog());
        store.create("Product", json!({"sku": "A"})).await.unwrap();

        let key = store.keys.model_count_key("Product", &Filters::new());
        store
            .cache
            .as_ref()
            .unwrap()
            .set(&key, json!(-1), None)
            .await
            .unwrap();
        assert_eq!(store.count("Product", &Filters::new()).await.unwrap(), 1);
    }

    // =========================================================================
    // Many-to-Many Tests
    // =========================================================================

    fn tagged() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry
            .register(ModelDefinition::new("Tag", vec![]))
            .unwrap();
        registry
            .register(
                ModelDefinition::new("Post", vec![]).with_relationship(
                    Relationship::new("tags", "Tag", "tag_id", RelationType::ManyToMany)
                        .on_delete(OnDelete::Cascade),
                ),
            )
            .unwrap();
        registry
            .register(ModelDefinition::new("Note", vec![]).with_relationship(Relationship::new(
                "tags",
                "Tag",
                "tag_id",
                RelationType::ManyToMany,
            )))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_many_to_many_resolve_is_not_implemented() {
        let (_backend, store) = store_with(tagged());
        let post = store.create("Post", json!({})).await.unwrap();

        let err = store.prefetch("Post", &[post], "tags").await.unwrap_err();
        assert!(matches!(err, StoreError::NotImplemented(_)));
        assert!(err.to_string().contains("tags"));
    }

    #[tokio::test]
    async fn test_many_to_many_cascade_is_rejected() {
        let (_backend, store) = store_with(tagged());
        let post = store.create("Post", json!({})).await.unwrap();

        let err = store.delete("Post", post.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotImplemented(_)));
        assert!(store.exists("Post", post.id).await.unwrap());

        // Without an on-delete policy there is nothing to enforce
        let note = store.create("Note", json!({})).await.unwrap();
        store.delete("Note", note.id).await.unwrap();
        assert!(!store.exists("Note", note.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_without_cache() {
        let backend = InMemoryObjectStore::new();
        let config = StoreConfig::builder("data").cache_enabled(false).build();
        let store = DocumentStore::from_factory(config, Arc::new(backend.clone()), Arc::new(catalog()))
            .unwrap()
            .with_cache(Arc::new(LruCache::default()));

        let created = store.create("Product", json!({"sku": "A"})).await.unwrap();
        backend.clear();
        assert!(store.get("Product", created.id).await.unwrap().is_none());
    }
}
