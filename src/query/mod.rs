//! Query emulation over prefix listing
//!
//! The object store only lists keys by prefix and fetches single objects, so
//! filtering, sorting and pagination all happen in memory after a scan.

pub mod engine;
pub mod filter;
pub mod sort;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

pub use engine::QueryEngine;
pub use filter::{FilterCondition, FilterOp, matches_all, parse_filters};
pub use sort::sort_documents;
pub use validate::{SYSTEM_FIELDS, validate_field_name, validate_key_segment, validate_model_name};

/// Filter map keyed by `field` or `field__op`
pub type Filters = BTreeMap<String, Value>;

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => f.write_str("asc"),
            SortOrder::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(StoreError::validation(format!(
                "Invalid sort order: '{}'. Must be 'asc' or 'desc'.",
                s
            ))),
        }
    }
}
