//! In-memory ordering of documents

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::SortOrder;
use super::filter::compare_values;

fn rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// Total order for sorting: type rank first, then value within a type.
/// Numeric strings are not coerced here, unlike in filters.
fn compare_for_sort(x: &Value, y: &Value) -> Ordering {
    rank(x)
        .cmp(&rank(y))
        .then_with(|| compare_values(x, y).unwrap_or(Ordering::Equal))
}

fn id_of(document: &Map<String, Value>) -> &str {
    document.get("id").and_then(Value::as_str).unwrap_or_default()
}

/// Order two documents by `field`.
///
/// Missing or null values sort last in both directions; ties fall back to
/// ascending id so pages are stable.
pub fn compare_documents(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    field: &str,
    order: SortOrder,
) -> Ordering {
    let present = |d: &Map<String, Value>| d.get(field).filter(|v| !v.is_null()).cloned();

    let primary = match (present(a), present(b)) {
        (Some(x), Some(y)) => {
            let ord = compare_for_sort(&x, &y);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    primary.then_with(|| id_of(a).cmp(id_of(b)))
}

/// Sort in place. Without a field, documents are ordered by id.
pub fn sort_documents(documents: &mut [Map<String, Value>], field: Option<&str>, order: SortOrder) {
    match field {
        Some(field) => documents.sort_by(|a, b| compare_documents(a, b, field, order)),
        None => documents.sort_by(|a, b| id_of(a).cmp(id_of(b))),
    }
}
