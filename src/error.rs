//! Error types for document store operations

use std::time::Duration;

use thiserror::Error;

/// Machine-readable error category.
///
/// Callers branch on this, never on the text of [`StoreError::hint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Operation,
    Validation,
    Auth,
    RateLimit,
    Configuration,
    Model,
}

/// A relationship that blocked a delete, with the number of dependents found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedBy {
    pub relationship: String,
    pub count: usize,
}

/// Errors that can occur during document store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        endpoint: Option<String>,
    },

    #[error("Timed out after {0:?} waiting for an available connection")]
    ConnectionTimeout(Duration),

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Operation '{operation}' failed: {message}")]
    Operation {
        operation: String,
        key: Option<String>,
        message: String,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Authentication error: {message}")]
    Auth { message: String, code: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        missing: Vec<String>,
    },

    #[error("Model error: {message}")]
    Model {
        message: String,
        model: Option<String>,
        field: Option<String>,
    },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Record not found: {model}/{id}")]
    RecordNotFound { model: String, id: String },

    #[error("Cannot delete: protected by relationships: {}", format_protected(.0))]
    Protected(Vec<ProtectedBy>),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_protected(items: &[ProtectedBy]) -> String {
    items
        .iter()
        .map(|p| format!("{} ({} objects)", p.relationship, p.count))
        .collect::<Vec<_>>()
        .join(", ")
}

impl StoreError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            endpoint: None,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn operation(operation: impl Into<String>, key: Option<&str>, msg: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            key: key.map(str::to_string),
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    pub fn field_validation(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
            message: msg.into(),
            code: "authentication_error".to_string(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            missing: Vec::new(),
        }
    }

    pub fn missing_configuration(fields: Vec<String>) -> Self {
        Self::Configuration {
            message: format!("Missing required configuration: {}", fields.join(", ")),
            missing: fields,
        }
    }

    pub fn model(model: impl Into<String>, field: Option<&str>, msg: impl Into<String>) -> Self {
        Self::Model {
            message: msg.into(),
            model: Some(model.into()),
            field: field.map(str::to_string),
        }
    }

    pub fn record_not_found(model: impl Into<String>, id: impl ToString) -> Self {
        Self::RecordNotFound {
            model: model.into(),
            id: id.to_string(),
        }
    }

    pub fn migration(msg: impl Into<String>) -> Self {
        Self::Migration(msg.into())
    }

    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::ConnectionTimeout(_) => ErrorKind::Connection,
            Self::NotFound { .. }
            | Self::Operation { .. }
            | Self::RecordNotFound { .. }
            | Self::Migration(_) => ErrorKind::Operation,
            Self::Validation { .. } | Self::Json(_) => ErrorKind::Validation,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Configuration { .. } | Self::UnknownModel(_) => ErrorKind::Configuration,
            Self::Model { .. } | Self::Protected(_) | Self::NotImplemented(_) => ErrorKind::Model,
        }
    }

    /// True for a missing object or record
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::RecordNotFound { .. })
    }

    /// Advisory hint for resolving the error, when one can be derived
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Connection { endpoint, .. } => match endpoint {
                Some(ep) if ep.contains("localhost") => Some(format!(
                    "Ensure the local object store at {} is running.",
                    ep
                )),
                _ => Some("Check your credentials and network connection.".to_string()),
            },
            Self::ConnectionTimeout(_) => Some(
                "All pooled connections are checked out; release connections or raise max_connections."
                    .to_string(),
            ),
            Self::NotFound { key } => Some(format!("The object at key '{}' does not exist.", key)),
            Self::Operation { message, key, .. } => {
                if message.contains("NoSuchBucket") {
                    Some("The specified bucket does not exist.".to_string())
                } else if message.contains("AccessDenied") {
                    Some("Check your IAM permissions for this operation.".to_string())
                } else {
                    key.as_ref()
                        .map(|k| format!("The failing operation targeted key '{}'.", k))
                }
            }
            Self::Validation { field, .. } => field
                .as_ref()
                .map(|f| format!("Check the value for field '{}'.", f)),
            Self::Auth { message, .. } => {
                let lower = message.to_lowercase();
                if lower.contains("token") {
                    Some("Ensure you're sending a valid, unrevoked token.".to_string())
                } else if lower.contains("password") {
                    Some("Check your username and password.".to_string())
                } else {
                    None
                }
            }
            Self::RateLimited { retry_after, .. } => Some(format!(
                "Try again in {} seconds.",
                retry_after.as_secs().max(1)
            )),
            Self::Configuration { missing, .. } => Some(if missing.is_empty() {
                "Check your store configuration.".to_string()
            } else {
                "Set these as environment variables.".to_string()
            }),
            Self::Model { message, field, .. } => {
                if message.to_lowercase().contains("unique") {
                    field.as_ref().map(|f| {
                        format!("The value for '{}' already exists. Choose a different value.", f)
                    })
                } else {
                    None
                }
            }
            Self::UnknownModel(name) => Some(format!(
                "Register the '{}' model with the ModelRegistry at startup.",
                name
            )),
            Self::NotImplemented(_) => Some(
                "Model many-to-many links as a join model with two many-to-one relationships."
                    .to_string(),
            ),
            Self::Protected(_) => {
                Some("Delete or reassign the dependent records first.".to_string())
            }
            Self::RecordNotFound { .. } | Self::Migration(_) | Self::Json(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            StoreError::ConnectionTimeout(Duration::from_secs(1)).kind(),
            ErrorKind::Connection
        );
        assert_eq!(StoreError::not_found("a/b.json").kind(), ErrorKind::Operation);
        assert_eq!(StoreError::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(StoreError::auth("bad token").kind(), ErrorKind::Auth);
        assert_eq!(
            StoreError::RateLimited {
                message: "slow down".into(),
                retry_after: Duration::from_secs(3)
            }
            .kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(StoreError::configuration("x").kind(), ErrorKind::Configuration);
        assert_eq!(
            StoreError::Protected(vec![]).kind(),
            ErrorKind::Model
        );
    }

    #[test]
    fn test_not_found_hint_names_key() {
        let err = StoreError::not_found("products/1.json");
        assert!(err.is_not_found());
        assert_eq!(
            err.hint().as_deref(),
            Some("The object at key 'products/1.json' does not exist.")
        );
    }

    #[test]
    fn test_protected_message_lists_relationships() {
        let err = StoreError::Protected(vec![
            ProtectedBy {
                relationship: "orders".into(),
                count: 3,
            },
            ProtectedBy {
                relationship: "reviews".into(),
                count: 1,
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Cannot delete: protected by relationships: orders (3 objects), reviews (1 objects)"
        );
    }

    #[test]
    fn test_missing_configuration() {
        let err = StoreError::missing_configuration(vec!["DOCBUCKET_BUCKET".into()]);
        assert!(err.to_string().contains("DOCBUCKET_BUCKET"));
        assert_eq!(
            err.hint().as_deref(),
            Some("Set these as environment variables.")
        );
    }

    #[test]
    fn test_unique_hint() {
        let err = StoreError::model("User", Some("email"), "unique constraint violated");
        assert!(err.hint().unwrap().contains("'email'"));
    }
}
