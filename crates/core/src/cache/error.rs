use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
    #[error("Cache operation timed out after {0}ms")]
    Timeout(u64),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Loader failed: {0}")]
    LoadFailed(String),
}

impl CacheError {
    /// Returns true when the error comes from the shared remote tier being
    /// unreachable or slow, as opposed to a local or loader failure.
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(
            self,
            CacheError::ConnectionFailed(_) | CacheError::OperationFailed(_) | CacheError::Timeout(_)
        )
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
