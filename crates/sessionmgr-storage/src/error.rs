//! Error types for storage operations.

use thiserror::Error;

/// Error type for page store and storage facade operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blob reference does not resolve to stored content.
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    /// The backing page store rejected the request.
    #[error("Page store error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
