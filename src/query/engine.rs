//! Scan-filter-sort-slice over a model's key prefix
//!
//! Every query lists all keys under the prefix (following continuation
//! tokens up to `max_scan_keys`), fetches each object, and evaluates the
//! filters and sort in memory. Cost is linear in model size; callers should
//! go through the cache tier for repeated queries.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::filter::{matches_all, parse_filters};
use super::sort::sort_documents;
use super::validate::validate_field_name;
use super::Filters;
use crate::client::ClientPool;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::model::ModelDefinition;
use crate::record::{ListQuery, QueryResult, Record};

pub struct QueryEngine {
    pool: ClientPool,
    bucket: String,
    base_path: String,
    list_page_size: usize,
    max_scan_keys: usize,
    default_page_size: usize,
}

impl QueryEngine {
    pub fn new(pool: ClientPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            bucket: config.bucket.clone(),
            base_path: config.base_path.clone(),
            list_page_size: config.list_page_size,
            max_scan_keys: config.max_scan_keys,
            default_page_size: config.default_page_size,
        }
    }

    /// All `.json` keys under a prefix, in listing order, capped at `max_scan_keys`
    pub async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.scan_keys_limited(prefix, self.max_scan_keys).await
    }

    pub async fn scan_keys_limited(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let client = self.pool.acquire().await?;
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = client
                .list_objects(&self.bucket, prefix, self.list_page_size, token.as_deref())
                .await?;
            keys.extend(page.keys.into_iter().filter(|k| k.ends_with(".json")));

            if keys.len() >= limit {
                if page.truncated || keys.len() > limit {
                    warn!(prefix, limit, "Key scan hit its safety cap; results are partial");
                }
                keys.truncate(limit);
                break;
            }
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }

        debug!(prefix, count = keys.len(), "Scanned keys");
        Ok(keys)
    }

    /// Fetch and parse records. Objects deleted mid-scan or not parseable as
    /// records are skipped.
    pub async fn fetch_records(&self, keys: &[String]) -> Result<Vec<Record>> {
        let client = self.pool.acquire().await?;
        let mut records = Vec::with_capacity(keys.len());

        for key in keys {
            let body = match client.get_object(&self.bucket, key).await {
                Ok(body) => body,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let parsed = serde_json::from_slice::<Map<String, Value>>(&body)
                .map_err(StoreError::from)
                .and_then(Record::from_document);
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable record"),
            }
        }
        Ok(records)
    }

    /// Every record of a model, up to `limit`
    pub async fn list_by_prefix(&self, model: &ModelDefinition, limit: usize) -> Result<Vec<Record>> {
        let keys = self
            .scan_keys_limited(&model.key_prefix(&self.base_path), limit.min(self.max_scan_keys))
            .await?;
        self.fetch_records(&keys).await
    }

    /// Every record matching `filters`, in id order
    pub async fn find(&self, model: &ModelDefinition, filters: &Filters) -> Result<Vec<Record>> {
        let mut documents = self.filtered_documents(model, filters).await?;
        sort_documents(&mut documents, None, Default::default());
        documents.into_iter().map(Record::from_document).collect()
    }

    pub async fn list(&self, model: &ModelDefinition, query: &ListQuery) -> Result<QueryResult> {
        if query.page == 0 {
            return Err(StoreError::field_validation("page", "Page numbers start at 1"));
        }
        let page_size = query.page_size.unwrap_or(self.default_page_size);
        if page_size == 0 {
            return Err(StoreError::field_validation("page_size", "Page size must be at least 1"));
        }
        if let Some(field) = &query.sort_field {
            validate_field_name(field, &[])
                .map_err(|e| StoreError::field_validation("sort_field", e))?;
        }

        let mut documents = self.filtered_documents(model, &query.filters).await?;
        sort_documents(&mut documents, query.sort_field.as_deref(), query.sort_order);

        let total = documents.len();
        let start = (query.page - 1).saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);
        let records = documents
            .drain(start..end)
            .map(Record::from_document)
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResult {
            records,
            total,
            page: query.page,
            page_size,
            next_page_token: (end < total).then(|| (query.page + 1).to_string()),
        })
    }

    pub async fn count(&self, model: &ModelDefinition, filters: &Filters) -> Result<usize> {
        Ok(self.filtered_documents(model, filters).await?.len())
    }

    async fn filtered_documents(
        &self,
        model: &ModelDefinition,
        filters: &Filters,
    ) -> Result<Vec<Map<String, Value>>> {
        let conditions = parse_filters(filters)?;
        let keys = self.scan_keys(&model.key_prefix(&self.base_path)).await?;
        let records = self.fetch_records(&keys).await?;

        Ok(records
            .iter()
            .map(Record::to_document)
            .filter(|doc| matches_all(doc, &conditions))
            .collect())
    }
}
