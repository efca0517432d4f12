//! Common error types for FitSync.

use thiserror::Error;

/// Top-level error type for FitSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure reaching the cloud store.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response from the cloud store.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Reading or writing the on-device store failed.
    #[error("Local store error: {0}")]
    LocalStore(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sync preconditions are not met.
    #[error("Sync unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Whether re-invoking the failed operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Io(_) => true,
            Error::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
