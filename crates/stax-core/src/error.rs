//! Error types for stax-core

use thiserror::Error;

/// Result type alias using stax-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stax-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure (connect, send, receive)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected wire message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server-reported stream failure
    #[error("Sync stream failed: {reason}")]
    Stream {
        reason: String,
        code: Option<String>,
    },

    /// Request did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Local store is unreadable; sync must stop until it is repaired
    #[error("Local store corrupted: {0}")]
    Corrupt(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether this error indicates an unreadable local store.
    ///
    /// Corruption is the only condition that stops the sync run loop; every
    /// other error is retried on a later cycle.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corrupt(_) => true,
            Self::Database(error) => {
                let message = error.to_string().to_ascii_lowercase();
                message.contains("file is not a database")
                    || message.contains("database disk image is malformed")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_detected_from_sqlite_message() {
        let error = Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTADB),
            Some("file is not a database".to_string()),
        ));
        assert!(error.is_corruption());

        assert!(Error::Corrupt("bad header".to_string()).is_corruption());
        assert!(!Error::InvalidInput("empty payload".to_string()).is_corruption());
        assert!(!Error::Transport("reset".to_string()).is_corruption());
    }
}
