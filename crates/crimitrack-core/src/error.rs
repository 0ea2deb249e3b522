//! Error types for crimitrack-core

use thiserror::Error;

/// Result type alias using crimitrack-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in crimitrack-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A record is missing fields its collection requires
    #[error("Validation error: {0}")]
    Validation(String),

    /// A snapshot was refused before anything was written (size, type, shape)
    #[error("Input rejected: {0}")]
    InputRejected(String),

    /// A snapshot carried no agenda and no expertise records
    #[error("Snapshot contains no agenda or expertise records")]
    EmptySnapshot,

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure talking to the peer or server
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A bounded operation ran out of time
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Record or queue item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error belongs to the storage family.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::Io(_))
    }

    /// Whether retrying the same operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(Error::Network("down".into()).is_retryable());
        assert!(Error::Timeout(3000).is_retryable());
        assert!(!Error::Validation("missing patronyme".into()).is_retryable());
        assert!(!Error::EmptySnapshot.is_retryable());
    }

    #[test]
    fn storage_family_includes_sqlite_and_io() {
        let io = Error::from(std::io::Error::other("disk full"));
        assert!(io.is_storage());
        assert!(Error::from(rusqlite::Error::QueryReturnedNoRows).is_storage());
        assert!(!Error::Network("down".into()).is_storage());
    }
}
