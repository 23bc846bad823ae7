//! Entity errors

/// Errors raised by the entity layer.
///
/// Remote fetch failures never show up here; they are absorbed at the query
/// boundary. These variants cover registration, lookup and field access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntityError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already registered: {0}")]
    DuplicateEntity(String),

    #[error("Unknown field '{field}' on {owner}")]
    UnknownField { owner: String, field: String },

    #[error("Invalid type for '{name}': expected {expected}")]
    InvalidType { name: String, expected: String },

    #[error("Entity not initialized: {0}")]
    NotInitialized(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for entity operations
pub type EntityResult<T> = Result<T, EntityError>;

impl EntityError {
    pub fn unknown_field(owner: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            owner: owner.into(),
            field: field.into(),
        }
    }

    pub fn invalid_type(name: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidType {
            name: name.into(),
            expected: expected.into(),
        }
    }
}
