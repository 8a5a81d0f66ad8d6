//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stored entry does not have the layout this store writes
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation timeout
    #[error("Operation timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Unknown named store
    #[error("No cache store registered under '{0}'")]
    UnknownStore(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = CacheError::Connection("refused".to_string());
        assert!(err.to_string().contains("refused"));

        let err = CacheError::UnknownStore("sessions".to_string());
        assert_eq!(err.to_string(), "No cache store registered under 'sessions'");
    }

    #[test]
    fn test_timeout_display() {
        let err = CacheError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Operation timeout after 250ms");
    }
}
