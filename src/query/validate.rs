//! Name validation for models, fields and key segments
//!
//! Model names end up inside cache keys and glob patterns, plural names and
//! ids end up inside object keys. Anything that could change the meaning of
//! a key or pattern is rejected here.

use std::sync::LazyLock;

use regex::Regex;

/// Fields every record carries; models cannot declare them
pub const SYSTEM_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

static MODEL_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$"));

static FIELD_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"));

static KEY_SEGMENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$"));

fn is_match(re: &LazyLock<Result<Regex, regex::Error>>, value: &str) -> Result<bool, String> {
    re.as_ref()
        .map(|re| re.is_match(value))
        .map_err(|e| e.to_string())
}

/// Validate a model name
///
/// Rules:
/// - Must start with a letter
/// - Can only contain letters, numbers, and underscores
///
/// # Example
/// ```
/// use docbucket::query::validate_model_name;
///
/// assert!(validate_model_name("Product").is_ok());
/// assert!(validate_model_name("Product:*").is_err());
/// ```
pub fn validate_model_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Model name cannot be empty".to_string());
    }
    if !is_match(&MODEL_NAME, name)? {
        return Err(format!(
            "Model name '{}' is invalid. Must start with a letter and contain only letters, numbers, and underscores.",
            name
        ));
    }
    Ok(())
}

/// Validate a field name, optionally rejecting the system fields
///
/// `__` is reserved as the filter operator separator.
pub fn validate_field_name(name: &str, reserved: &[&str]) -> Result<(), String> {
    if name.is_empty() {
        return Err("Field name cannot be empty".to_string());
    }
    if !is_match(&FIELD_NAME, name)? {
        return Err(format!(
            "Field name '{}' is invalid. Must start with a letter or underscore and contain only letters, numbers, and underscores.",
            name
        ));
    }
    if name.contains("__") {
        return Err(format!(
            "Field name '{}' cannot contain '__', which separates filter operators.",
            name
        ));
    }
    if reserved.contains(&name) {
        return Err(format!(
            "Field name '{}' is reserved and cannot be used.",
            name
        ));
    }
    Ok(())
}

/// Validate one path segment of an object key (a plural model name)
pub fn validate_key_segment(segment: &str) -> Result<(), String> {
    if !is_match(&KEY_SEGMENT, segment)? {
        return Err(format!(
            "Key segment '{}' is invalid. Must be lowercase letters, numbers, '_' or '-'.",
            segment
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Model Name Tests
    // =========================================================================

    #[test]
    fn test_model_name_valid() {
        assert!(validate_model_name("Product").is_ok());
        assert!(validate_model_name("RefreshToken").is_ok());
        assert!(validate_model_name("order_item2").is_ok());
    }

    #[test]
    fn test_model_name_invalid() {
        assert!(validate_model_name("").unwrap_err().contains("cannot be empty"));
        assert!(validate_model_name("1Product").is_err());
        assert!(validate_model_name("Pro:duct").is_err());
        assert!(validate_model_name("Product*").is_err());
        assert!(validate_model_name("my model").is_err());
    }

    // =========================================================================
    // Field Name Tests
    // =========================================================================

    #[test]
    fn test_field_name_valid() {
        assert!(validate_field_name("price", &[]).is_ok());
        assert!(validate_field_name("_internal", &[]).is_ok());
        assert!(validate_field_name("authorId", &[]).is_ok());
    }

    #[test]
    fn test_field_name_invalid_chars() {
        assert!(validate_field_name("my-field", &[]).is_err());
        assert!(validate_field_name("my.field", &[]).is_err());
        assert!(validate_field_name("9lives", &[]).is_err());
    }

    #[test]
    fn test_field_name_operator_separator() {
        let err = validate_field_name("price__gt", &[]).unwrap_err();
        assert!(err.contains("__"));
    }

    #[test]
    fn test_field_name_reserved() {
        let err = validate_field_name("id", SYSTEM_FIELDS).unwrap_err();
        assert!(err.contains("reserved"));
        assert!(validate_field_name("created_at", SYSTEM_FIELDS).is_err());
        assert!(validate_field_name("id", &[]).is_ok());
    }

    // =========================================================================
    // Key Segment Tests
    // =========================================================================

    #[test]
    fn test_key_segment() {
        assert!(validate_key_segment("products").is_ok());
        assert!(validate_key_segment("order-items").is_ok());
        assert!(validate_key_segment("Products").is_err());
        assert!(validate_key_segment("a/b").is_err());
        assert!(validate_key_segment("").is_err());
    }
}
