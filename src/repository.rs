//! Typed access to records of a [`Model`]

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::model::Model;
use crate::query::Filters;
use crate::record::{ListQuery, Record};
use crate::relationships::CascadeOutcome;
use crate::store::DocumentStore;

/// A typed record: system fields plus the model's own data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<T> {
    pub id: Uuid,
    #[serde(with = "crate::record::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::record::timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Model> Entity<T> {
    pub fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            id: record.id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            data: serde_json::from_value(Value::Object(record.fields))?,
        })
    }
}

/// One page of typed records
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<Entity<T>>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub next_page_token: Option<String>,
}

/// Statically typed façade over [`DocumentStore`] for one model
pub struct Repository<T: Model> {
    store: Arc<DocumentStore>,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _model: PhantomData,
        }
    }
}

impl<T: Model> Repository<T> {
    /// The model must already be registered with the store's registry
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            _model: PhantomData,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub async fn create(&self, data: &T) -> Result<Entity<T>> {
        let record = self.store.create(T::NAME, serde_json::to_value(data)?).await?;
        Entity::from_record(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Entity<T>>> {
        self.store
            .get(T::NAME, id)
            .await?
            .map(Entity::from_record)
            .transpose()
    }

    /// Partial update with a JSON patch
    pub async fn update(&self, id: Uuid, patch: Value) -> Result<Entity<T>> {
        Entity::from_record(self.store.update(T::NAME, id, patch).await?)
    }

    /// Write back every field of an entity
    pub async fn save(&self, entity: &Entity<T>) -> Result<Entity<T>> {
        self.update(entity.id, serde_json::to_value(&entity.data)?)
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<CascadeOutcome> {
        self.store.delete(T::NAME, id).await
    }

    pub async fn exists(&self, id: Uuid) -> Result<bool> {
        self.store.exists(T::NAME, id).await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Page<T>> {
        let result = self.store.list(T::NAME, query).await?;
        Ok(Page {
            items: result
                .records
                .into_iter()
                .map(Entity::from_record)
                .collect::<Result<_>>()?,
            total: result.total,
            page: result.page,
            page_size: result.page_size,
            next_page_token: result.next_page_token,
        })
    }

    pub async fn count(&self, filters: &Filters) -> Result<usize> {
        self.store.count(T::NAME, filters).await
    }
}
