//! Core type definitions for model fields
//!
//! Includes field types and field definitions with value validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Typed Field Definitions
// ============================================================================

/// Field type with value validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// Text field
    String,

    /// 64-bit integer field
    Integer,

    /// Floating point field
    Float,

    /// Boolean field
    Boolean,

    /// Timestamp field, RFC 3339 string
    Timestamp,

    /// UUID field, hyphenated string
    Uuid,

    /// Arbitrary JSON value
    Json,

    /// Enum field with allowed values
    Enum {
        /// List of allowed string values
        values: Vec<String>,
    },
}

impl FieldType {
    /// Create an Enum type from its allowed values
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldType::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Validate that a JSON value is compatible with this field type
    pub fn validate_value(&self, value: &Value) -> Result<(), String> {
        // Null is handled by the nullable flag, not type validation
        if value.is_null() {
            return Ok(());
        }

        match (self, value) {
            (FieldType::String, Value::String(_)) => Ok(()),
            (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            // String-to-integer coercion (common for query-string input)
            (FieldType::Integer, Value::String(s)) => s
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("Cannot convert '{}' to integer", s)),
            (FieldType::Float, Value::Number(_)) => Ok(()),
            (FieldType::Float, Value::String(s)) => s
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("Cannot convert '{}' to float", s)),
            (FieldType::Boolean, Value::Bool(_)) => Ok(()),
            (FieldType::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "false" | "1" | "0" | "yes" | "no" => Ok(()),
                _ => Err(format!("Cannot convert '{}' to boolean", s)),
            },
            (FieldType::Timestamp, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|_| ())
                .map_err(|e| format!("Invalid timestamp format: {}", e)),
            (FieldType::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s)
                .map(|_| ())
                .map_err(|e| format!("Invalid UUID '{}': {}", s, e)),
            (FieldType::Json, _) => Ok(()),
            (FieldType::Enum { values }, Value::String(s)) => {
                if values.contains(s) {
                    Ok(())
                } else {
                    Err(format!("Value '{}' not in enum values: {:?}", s, values))
                }
            }
            _ => Err(format!("Type mismatch: expected {:?}, got {}", self, value)),
        }
    }
}

fn default_nullable() -> bool {
    true
}

/// Field definition for a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDefinition {
    /// Field name, as stored in the JSON document
    pub name: String,

    /// Field type with validation rules
    #[serde(flatten)]
    pub field_type: FieldType,

    /// Whether the field accepts null or may be absent (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Whether values must be unique across the model (default: false)
    #[serde(default)]
    pub unique: bool,

    /// Value filled in on create when the field is absent
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "default")]
    pub default_value: Option<Value>,
}

impl FieldDefinition {
    /// Create a new field definition with a name and type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            unique: false,
            default_value: None,
        }
    }

    /// Mark the field as required
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the field as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set a default value
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Validate a (possibly absent) value against this definition
    pub fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        match value {
            None | Some(Value::Null) if !self.nullable => {
                Err(format!("Field '{}' is required", self.name))
            }
            None => Ok(()),
            Some(v) => self
                .field_type
                .validate_value(v)
                .map_err(|e| format!("Field '{}': {}", self.name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // FieldType Serialization Tests
    // =========================================================================

    #[test]
    fn test_field_type_string_serialization() {
        let json = serde_json::to_string(&FieldType::String).unwrap();
        assert_eq!(json, r#"{"type":"string"}"#);
    }

    #[test]
    fn test_field_type_enum_serialization() {
        let t = FieldType::enumeration(["a", "b"]);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"type\":\"enum\""));
        assert!(json.contains("\"values\""));
    }

    #[test]
    fn test_field_type_deserialization() {
        let t: FieldType = serde_json::from_str(r#"{"type":"uuid"}"#).unwrap();
        assert_eq!(t, FieldType::Uuid);
    }

    // =========================================================================
    // Value Validation Tests
    // =========================================================================

    #[test]
    fn test_validate_string() {
        let t = FieldType::String;
        assert!(t.validate_value(&json!("hello")).is_ok());
        assert!(t.validate_value(&json!("")).is_ok());
        assert!(t.validate_value(&json!(123)).is_err());
        assert!(t.validate_value(&json!({"key": "value"})).is_err());
    }

    #[test]
    fn test_validate_integer_and_coercion() {
        let t = FieldType::Integer;
        assert!(t.validate_value(&json!(-456)).is_ok());
        assert!(t.validate_value(&json!(9223372036854775807_i64)).is_ok());
        assert!(t.validate_value(&json!("123")).is_ok());
        assert!(t.validate_value(&json!("12.34")).is_err());
        assert!(t.validate_value(&json!(1.5)).is_err());
    }

    #[test]
    fn test_validate_float() {
        let t = FieldType::Float;
        assert!(t.validate_value(&json!(1)).is_ok());
        assert!(t.validate_value(&json!(99.99)).is_ok());
        assert!(t.validate_value(&json!("-0.5")).is_ok());
        assert!(t.validate_value(&json!("not a number")).is_err());
    }

    #[test]
    fn test_validate_boolean_coercion() {
        let t = FieldType::Boolean;
        assert!(t.validate_value(&json!(false)).is_ok());
        assert!(t.validate_value(&json!("TRUE")).is_ok());
        assert!(t.validate_value(&json!("no")).is_ok());
        assert!(t.validate_value(&json!("maybe")).is_err());
    }

    #[test]
    fn test_validate_timestamp() {
        let t = FieldType::Timestamp;
        assert!(t.validate_value(&json!("2024-01-15T10:30:00Z")).is_ok());
        assert!(t.validate_value(&json!("2024-01-15T10:30:00+05:00")).is_ok());
        assert!(t.validate_value(&json!("2024-01-15")).is_err());
        assert!(t.validate_value(&json!(123456789)).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        let t = FieldType::Uuid;
        assert!(
            t.validate_value(&json!("67e55044-10b1-426f-9247-bb680e5fe0c8"))
                .is_ok()
        );
        assert!(t.validate_value(&json!("not-a-uuid")).is_err());
    }

    #[test]
    fn test_validate_json_accepts_any() {
        let t = FieldType::Json;
        assert!(t.validate_value(&json!([1, 2, 3])).is_ok());
        assert!(t.validate_value(&json!({"nested": {"a": 1}})).is_ok());
    }

    #[test]
    fn test_validate_enum() {
        let t = FieldType::enumeration(["pending", "active"]);
        assert!(t.validate_value(&json!("pending")).is_ok());
        assert!(t.validate_value(&json!("PENDING")).is_err()); // case sensitive
    }

    #[test]
    fn test_validate_null_always_ok() {
        assert!(FieldType::String.validate_value(&Value::Null).is_ok());
        assert!(FieldType::Integer.validate_value(&Value::Null).is_ok());
    }

    // =========================================================================
    // FieldDefinition Tests
    // =========================================================================

    #[test]
    fn test_field_definition_new() {
        let field = FieldDefinition::new("name", FieldType::String);
        assert_eq!(field.name, "name");
        assert!(field.nullable);
        assert!(!field.unique);
        assert!(field.default_value.is_none());
    }

    #[test]
    fn test_field_definition_chained_builders() {
        let field = FieldDefinition::new("status", FieldType::String)
            .not_null()
            .unique()
            .default("active");

        assert!(!field.nullable);
        assert!(field.unique);
        assert_eq!(field.default_value, Some(json!("active")));
    }

    #[test]
    fn test_required_field_rejects_missing_and_null() {
        let field = FieldDefinition::new("sku", FieldType::String).not_null();
        assert!(field.validate(None).is_err());
        assert!(field.validate(Some(&Value::Null)).is_err());
        assert!(field.validate(Some(&json!("A-1"))).is_ok());
    }

    #[test]
    fn test_optional_field_allows_missing() {
        let field = FieldDefinition::new("note", FieldType::String);
        assert!(field.validate(None).is_ok());
        assert!(field.validate(Some(&json!(5))).is_err());
    }

    #[test]
    fn test_field_definition_roundtrip_json() {
        let json = r#"{"name":"count","type":"integer","nullable":false,"unique":true,"default":0}"#;
        let field: FieldDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(field.field_type, FieldType::Integer);
        assert!(!field.nullable);
        assert!(field.unique);
        assert_eq!(field.default_value, Some(json!(0)));
    }
}
