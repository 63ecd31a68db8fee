//! In-memory filter evaluation
//!
//! Filter keys are `field` (equality) or `field__op`. Conditions are ANDed.
//! A condition on a field the document lacks never matches.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::Filters;
use super::validate::validate_field_name;
use crate::error::{Result, StoreError};

/// Supported comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

impl FilterOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            "contains" => FilterOp::Contains,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Contains => "contains",
        }
    }
}

/// One parsed `field__op = value` condition
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FilterCondition {
    /// Parse a filter key such as `price__gte` with its operand
    pub fn parse(key: &str, value: &Value) -> Result<Self> {
        let (field, op) = match key.rsplit_once("__") {
            Some((field, suffix)) => {
                let op = FilterOp::parse(suffix).ok_or_else(|| {
                    StoreError::field_validation(
                        key,
                        format!(
                            "Unknown filter operator '{}'. Supported: eq, ne, gt, gte, lt, lte, in, contains",
                            suffix
                        ),
                    )
                })?;
                (field, op)
            }
            None => (key, FilterOp::Eq),
        };

        validate_field_name(field, &[]).map_err(|e| StoreError::field_validation(key, e))?;

        if op == FilterOp::In && !value.is_array() {
            return Err(StoreError::field_validation(
                key,
                "The 'in' operator requires an array operand",
            ));
        }

        Ok(Self {
            field: field.to_string(),
            op,
            value: value.clone(),
        })
    }

    /// Evaluate against a flat document
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        let Some(actual) = document.get(&self.field) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|candidates| candidates.iter().any(|c| values_equal(actual, c))),
            FilterOp::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                _ => false,
            },
        }
    }
}

/// Parse every filter in a query, rejecting unknown operators
pub fn parse_filters(filters: &Filters) -> Result<Vec<FilterCondition>> {
    filters
        .iter()
        .map(|(key, value)| FilterCondition::parse(key, value))
        .collect()
}

/// True when the document satisfies every condition
pub fn matches_all(document: &Map<String, Value>, conditions: &[FilterCondition]) -> bool {
    conditions.iter().all(|c| c.matches(document))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Equality with numeric coercion (`1 == 1.0`, `"10" == 10`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Ordering between two scalar values, `None` when they are not comparable
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            as_number(a)?.partial_cmp(&as_number(b)?)
        }
        _ => None,
    }
}
