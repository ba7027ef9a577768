//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Fetch Error ==
/// Outcome of a failed data-access call.
///
/// Cloneable so a single in-flight fetch can hand the same failure to
/// every waiter attached to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The remote backend reported a failure
    #[error("Fetch failed: {0}")]
    Failed(String),

    /// The fetch was superseded, invalidated or timed out
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Convenience constructor for backend failures.
    pub fn failed(msg: impl Into<String>) -> Self {
        FetchError::Failed(msg.into())
    }
}

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid key or argument
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The data-access collaborator failed
    #[error("{0}")]
    Fetch(FetchError),

    /// The request was superseded before it resolved
    #[error("Request cancelled")]
    Cancelled,

    /// Durable storage failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure in a durable adapter
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or policy table
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Returns true for superseded or timed-out requests.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CacheError::Cancelled | CacheError::Fetch(FetchError::Cancelled)
        )
    }
}

impl From<FetchError> for CacheError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => CacheError::Cancelled,
            other => CacheError::Fetch(other),
        }
    }
}

impl From<CacheError> for FetchError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Cancelled => FetchError::Cancelled,
            CacheError::Fetch(inner) => inner,
            other => FetchError::Failed(other.to_string()),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_fetch_maps_to_cancelled() {
        let err: CacheError = FetchError::Cancelled.into();
        assert!(matches!(err, CacheError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_failed_fetch_keeps_message() {
        let err: CacheError = FetchError::failed("backend down").into();
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "Fetch failed: backend down");
    }

    #[test]
    fn test_serialization_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CacheError = parse.into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
