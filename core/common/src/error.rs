//! Common error types for the offline-sync crates.

use thiserror::Error;

/// Top-level error type for offline-sync operations.
///
/// Connectivity failures and timeouts are not errors; the transport reports
/// them as `Delivery::Unreachable`.
#[derive(Debug, Error)]
pub enum Error {
    /// Required wiring or configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistent store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A request could not be built or handed to the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The sync scheduler task is no longer running.
    #[error("Scheduler stopped")]
    SchedulerStopped,

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidInput(format!("Invalid URL: {}", err))
    }
}

impl Error {
    /// Returns true if this error indicates missing or invalid wiring.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
