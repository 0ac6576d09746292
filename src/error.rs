//! Error types for DEPOT.

use thiserror::Error;

/// Common error type for DEPOT.
#[derive(Error, Debug)]
pub enum DepotError {
    /// Database error.
    ///
    /// This is a generic database error that wraps errors from any database backend.
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Permission denied error.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Credential issuance failed.
    ///
    /// No credentials means no safe upload path, so this aborts the
    /// triggering write instead of being swallowed.
    #[error("credential issuance failed: {0}")]
    CredentialIssuance(String),

    /// Storage service other than the supported object store.
    #[error("unsupported storage service: {0}")]
    UnsupportedService(String),

    /// Object storage operation failed.
    #[error("object storage error: {0}")]
    ObjectStorage(String),

    /// Property serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

// Conversion from sqlx errors
impl From<sqlx::Error> for DepotError {
    fn from(e: sqlx::Error) -> Self {
        DepotError::Database(e.to_string())
    }
}

/// Result type alias for DEPOT operations.
pub type Result<T> = std::result::Result<T, DepotError>;
