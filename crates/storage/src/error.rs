//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// The store answered with a rate-limit response (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// True for a rate-limit response from the store.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StorageError::RateLimited("slow down".into()).is_rate_limited());
        assert!(!StorageError::NotFound("k".into()).is_rate_limited());
        assert!(StorageError::NotFound("k".into()).is_not_found());
        let status = StorageError::Status {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(!status.is_rate_limited());
        assert_eq!(status.to_string(), "store returned 503: unavailable");
    }
}
