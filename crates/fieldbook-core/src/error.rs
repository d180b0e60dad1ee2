//! Error types for fieldbook-core

use thiserror::Error;

/// Result type alias using fieldbook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldbook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote API failure; `retryable` drives the outbox retry policy
    #[error("Remote error: {message}")]
    Remote { message: String, retryable: bool },

    /// Capture pipeline failure (corrupt file, provider fault)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Compressed annotation payload exceeds the hard size cap
    #[error("Annotation payload is {size} bytes, limit is {limit}")]
    AnnotationTooLarge { size: usize, limit: usize },

    /// Blob/object storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Build a retryable remote error (network failure, timeout).
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a non-retryable remote error (validation, conflict).
    pub fn remote_rejected(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether this error is safe to retry on the next sync cycle.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote { retryable: true, .. })
    }
}
