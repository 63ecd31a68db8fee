//! In-process object store
//!
//! Keeps every bucket in a sorted map so listings come back in key order with
//! numeric continuation tokens, the way S3's ListObjectsV2 pages. Used by the
//! test suites and by anything that wants the store without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::{
    ConnectionFactory, ListObjectsPage, ObjectHead, ObjectStoreClient, PresignedPost,
    UploadCondition,
};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    head: ObjectHead,
}

#[derive(Debug, Default)]
struct MemoryInner {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    connections_opened: AtomicUsize,
    failing_connects: AtomicUsize,
    read_only: AtomicBool,
}

/// Clonable handle over shared in-memory buckets
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    inner: Arc<MemoryInner>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions handed out through [`ConnectionFactory::connect`]
    pub fn connections_opened(&self) -> usize {
        self.inner.connections_opened.load(Ordering::SeqCst)
    }

    /// Make the next `count` calls to `connect` fail
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Reject every write with an operation error while set
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Snapshot of a bucket's objects, decoded as UTF-8 where possible
    pub fn bucket_data(&self, bucket: &str) -> BTreeMap<String, String> {
        let buckets = self.inner.buckets.lock();
        buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(k, o)| (k.clone(), String::from_utf8_lossy(&o.body).into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of objects stored under a prefix
    pub fn object_count(&self, bucket: &str, prefix: &str) -> usize {
        let buckets = self.inner.buckets.lock();
        buckets
            .get(bucket)
            .map(|objects| objects.keys().filter(|k| k.starts_with(prefix)).count())
            .unwrap_or(0)
    }

    /// Drop every bucket
    pub fn clear(&self) {
        self.inner.buckets.lock().clear();
    }

    fn check_writable(&self, operation: &str, key: &str) -> Result<()> {
        if self.inner.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::operation(
                operation,
                Some(key),
                "AccessDenied: store is read-only",
            ));
        }
        Ok(())
    }
}

fn etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", &hex::encode(digest)[..32])
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let buckets = self.inner.buckets.lock();
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.check_writable("put_object", key)?;
        let head = ObjectHead {
            size: body.len() as u64,
            content_type: content_type.to_string(),
            last_modified: Utc::now(),
            etag: Some(etag(&body)),
        };
        self.inner
            .buckets
            .lock()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { body, head });
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.check_writable("delete_object", key)?;
        if let Some(objects) = self.inner.buckets.lock().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsPage> {
        let start = match continuation_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                StoreError::operation(
                    "list_objects",
                    None,
                    format!("invalid continuation token '{}'", token),
                )
            })?,
            None => 0,
        };

        let buckets = self.inner.buckets.lock();
        let Some(objects) = buckets.get(bucket) else {
            return Ok(ListObjectsPage::default());
        };

        let matching: Vec<&String> = objects.keys().filter(|k| k.starts_with(prefix)).collect();
        let end = (start + max_keys.max(1)).min(matching.len());
        let keys = matching
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|k| (*k).clone())
            .collect();
        let truncated = end < matching.len();

        Ok(ListObjectsPage {
            keys,
            truncated,
            next_token: truncated.then(|| end.to_string()),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let buckets = self.inner.buckets.lock();
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.head.clone())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn presigned_upload(
        &self,
        bucket: &str,
        key: &str,
        conditions: &[UploadCondition],
        expires_in: Duration,
    ) -> Result<PresignedPost> {
        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), key.to_string());
        fields.insert(
            "x-amz-expires".to_string(),
            expires_in.as_secs().to_string(),
        );
        for condition in conditions {
            if let UploadCondition::ContentType { value } = condition {
                fields.insert("Content-Type".to_string(), value.clone());
            }
        }
        Ok(PresignedPost {
            url: format!("https://{}.s3.memory.local/", bucket),
            fields,
        })
    }

    async fn presigned_download(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String> {
        Ok(format!(
            "https://{}.s3.memory.local/{}?X-Amz-Expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }
}

#[async_trait]
impl ConnectionFactory for InMemoryObjectStore {
    async fn connect(&self) -> Result<Arc<dyn ObjectStoreClient>> {
        let failing = self.inner.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Connection {
                message: "connection refused".to_string(),
                endpoint: Some("http://localhost:9000".to_string()),
            });
        }
        self.inner.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}
