//! Record documents and list queries
//!
//! Includes Record, ListQuery and QueryResult.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::query::{Filters, SortOrder};

/// RFC 3339 with fixed microsecond precision, so stored timestamps sort
/// lexicographically in time order.
pub(crate) mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// A stored JSON document.
///
/// Serialized flat: the system fields sit next to the model's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Immutable once assigned
    pub id: Uuid,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with a fresh id and both timestamps set to now
    pub fn new(fields: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Value of a model field or a system field, as stored
    pub fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.to_string())),
            "created_at" => Some(Value::String(timestamp::format(&self.created_at))),
            "updated_at" => Some(Value::String(timestamp::format(&self.updated_at))),
            _ => self.fields.get(field).cloned(),
        }
    }

    /// Foreign-key style read: a string field parsed as a UUID
    pub fn uuid_field(&self, field: &str) -> Option<Uuid> {
        match self.field_value(field)? {
            Value::String(s) => Uuid::parse_str(&s).ok(),
            _ => None,
        }
    }

    /// Flat JSON object as written to the store
    pub fn to_document(&self) -> Map<String, Value> {
        let mut document = self.fields.clone();
        document.insert("id".into(), Value::String(self.id.to_string()));
        document.insert(
            "created_at".into(),
            Value::String(timestamp::format(&self.created_at)),
        );
        document.insert(
            "updated_at".into(),
            Value::String(timestamp::format(&self.updated_at)),
        );
        document
    }

    /// Parse a flat JSON object read from the store
    pub fn from_document(document: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(document)).map_err(|e| {
            StoreError::validation(format!("Stored document is not a valid record: {}", e))
        })
    }

    /// Deserialize the flat document into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.to_document()))?)
    }
}

fn default_page() -> usize {
    1
}

/// Filter, sort and page window for a list query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    /// `field` or `field__op` -> operand, all must match
    #[serde(default)]
    pub filters: Filters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: usize,
    /// Falls back to the store's default page size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filters: Filters::new(),
            sort_field: None,
            sort_order: SortOrder::Asc,
            page: 1,
            page_size: None,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter condition
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Set sorting
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.sort_order = order;
        self
    }

    /// Set pagination
    pub fn paginate(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = Some(page_size);
        self
    }

    /// Continue from a `next_page_token` returned by a previous page
    pub fn with_page_token(mut self, token: &str) -> Result<Self> {
        self.page = token
            .parse()
            .map_err(|_| StoreError::validation(format!("Invalid page token '{}'", token)))?;
        Ok(self)
    }
}

/// One page of a list query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub records: Vec<Record>,
    /// Matching records across all pages
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    /// Present when another page follows
    pub next_page_token: Option<String>,
}

impl QueryResult {
    pub fn has_more(&self) -> bool {
        self.next_page_token.is_some()
    }
}
