//! Error types for queued operations.

/// Error returned when awaiting a queued operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The queue was torn down before the operation produced a result.
    #[error("Operation '{operation}' on queue '{queue}' was abandoned")]
    Abandoned { queue: String, operation: String },
}

/// Result type for queued operations.
pub type Result<T> = std::result::Result<T, Error>;
