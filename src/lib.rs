//! # docbucket
//!
//! A document database layer over S3-compatible object storage.
//!
//! Each record is one JSON object at `<base_path><plural_name>/<id>.json`.
//! Reads go through an optional cache tier, queries run in memory over prefix
//! listings, relationships are resolved and enforced on delete, and stored
//! documents evolve through versioned, reversible migrations.
//!
//! ## Features
//!
//! - **Client Pool**: Bounded pool of object store sessions with acquire timeouts
//! - **Cache Tier**: TTL map, LRU and two-level composite caches behind one trait
//! - **Query Engine**: Django-style `field__op` filters, sorting and 1-based pagination
//! - **Relationships**: Batch resolution and cascade / set-null / protect on delete
//! - **Migrations**: Ordered, reversible document transformations with persisted history
//! - **Auth Bookkeeping**: Token blacklist, rate limiter and rotating refresh tokens
//! - **Uploads**: Presigned direct-to-bucket uploads with confirmation records
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use docbucket::{
//!     DocumentStore, FieldDefinition, FieldType, InMemoryObjectStore, ListQuery,
//!     ModelDefinition, ModelRegistry, SortOrder, StoreConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ModelRegistry::new();
//!     registry.register(ModelDefinition::new(
//!         "Product",
//!         vec![
//!             FieldDefinition::new("sku", FieldType::String).unique().not_null(),
//!             FieldDefinition::new("price", FieldType::Float),
//!             FieldDefinition::new("in_stock", FieldType::Boolean).default(true),
//!         ],
//!     ))?;
//!
//!     let store = DocumentStore::from_factory(
//!         StoreConfig::builder("shop").base_path("prod/").build(),
//!         Arc::new(InMemoryObjectStore::new()),
//!         Arc::new(registry),
//!     )?;
//!
//!     let product = store
//!         .create("Product", serde_json::json!({"sku": "W-1", "price": 29.99}))
//!         .await?;
//!
//!     let page = store
//!         .list(
//!             "Product",
//!             &ListQuery::new()
//!                 .filter("price__lt", 50)
//!                 .sort_by("price", SortOrder::Desc)
//!                 .paginate(1, 20),
//!         )
//!         .await?;
//!     assert_eq!(page.records[0].id, product.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use docbucket::{PoolConfig, StoreConfig};
//!
//! let config = StoreConfig::builder("my-bucket")
//!     .base_path("tenant-a/")             // Prefix for every key
//!     .cache_prefix("s3v")                 // Namespace for cache keys
//!     .pool(PoolConfig::new(10, Duration::from_secs(30)))
//!     .build();
//! ```
//!
//! ## Multi-Tenancy
//!
//! Tenants are separated by `base_path`. Each tenant gets its own
//! `DocumentStore`; nothing in a key identifies the tenant otherwise.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod migrations;
pub mod model;
pub mod query;
pub mod record;
pub mod relationships;
pub mod repository;
pub mod store;
pub mod types;
pub mod uploads;

// Re-export main types for convenience
pub use cache::{CacheBackend, CacheKeyBuilder, CacheStats, CompositeCache, InMemoryCache, LruCache};
pub use client::{
    ClientPool, ConnectionFactory, InMemoryObjectStore, ObjectStoreClient, PoolStats,
    PooledClient,
};
pub use config::{CacheConfig, PoolConfig, StoreConfig, StoreConfigBuilder};
pub use error::{ErrorKind, Result, StoreError};
pub use migrations::{Migration, MigrationOutcome, MigrationRunner, MigrationStatus};
pub use model::{Model, ModelDefinition, ModelRegistry};
pub use query::{Filters, QueryEngine, SortOrder};
pub use record::{ListQuery, QueryResult, Record};
pub use relationships::{CascadeOutcome, OnDelete, RelationType, Related, Relationship};
pub use repository::{Entity, Page, Repository};
pub use store::DocumentStore;
pub use types::{FieldDefinition, FieldType};
pub use uploads::{PresignedUploadService, UploadConfig, UploadedFile};
