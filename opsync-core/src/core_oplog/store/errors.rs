/*
    errors.rs - Error types for the operation log subsystem

    Defines all error types that can occur in:
    - Log and snapshot storage
    - Schema decoding and migration
    - Payload validation
    - State transitions during replay
*/

use thiserror::Error;

/// Errors that can occur in the operation log subsystem
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Corrupted data detected
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// A state transition could not be applied
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Validation-specific errors
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid field value
    #[error("Invalid field value: {field} - {reason}")]
    InvalidField { field: String, reason: String },

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Duplicate entry
    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            StoreError::Deserialization(err.to_string())
        } else {
            StoreError::Serialization(err.to_string())
        }
    }
}
