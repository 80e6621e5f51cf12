//! Error types for the cache drivers
//!
//! Provides unified error handling using thiserror. Only
//! `InvalidConfiguration` ever reaches callers; every other variant is
//! swallowed at the driver contract boundary and turned into a miss.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache drivers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in the backend
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key exists physically but its lifetime has elapsed
    #[error("Key expired: {0}")]
    Expired(String),

    /// Stored entry does not match the expected layout
    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    /// Payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Networked store failure (unreachable, protocol, auth)
    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// Unsupported driver or malformed options, raised at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache drivers.
pub type Result<T> = std::result::Result<T, CacheError>;
