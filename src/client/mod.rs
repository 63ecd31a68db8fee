//! Object store capability
//!
//! The store never talks a vendor wire protocol. It is handed something that
//! implements [`ObjectStoreClient`], usually through a [`pool::ClientPool`].

pub mod memory;
pub mod pool;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::InMemoryObjectStore;
pub use pool::{ClientPool, PoolStats, PooledClient};

/// One page of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsPage {
    pub keys: Vec<String>,
    pub truncated: bool,
    pub next_token: Option<String>,
}

/// Metadata returned by `head_object`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHead {
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

/// Constraint attached to a presigned upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum UploadCondition {
    ContentType { value: String },
    ContentLengthRange { min: u64, max: u64 },
}

/// Form target for a browser-side upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedPost {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

/// Capability every object store backend provides
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetch an object body. Fails with `StoreError::NotFound` when absent.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<()>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsPage>;

    /// Fetch object metadata. Fails with `StoreError::NotFound` when absent.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead>;

    async fn presigned_upload(
        &self,
        bucket: &str,
        key: &str,
        conditions: &[UploadCondition],
        expires_in: Duration,
    ) -> Result<PresignedPost>;

    async fn presigned_download(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String>;
}

/// Opens new client sessions for the pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ObjectStoreClient>>;
}
