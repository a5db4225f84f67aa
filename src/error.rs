//! Error types for routeros-client.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all router API operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TCP connect did not complete within the configured timeout.
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Connection closed by the router, or already torn down after an earlier failure.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Login rejected (bad credentials, missing legacy challenge).
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// `!trap` reply. Only the current command failed.
    #[error("Command failed: {message}")]
    Trap {
        /// Text of the `=message=` attribute.
        message: String,
        /// Numeric `=category=` attribute, when the router sent one.
        category: Option<u32>,
    },

    /// `!fatal` reply. The router considers the connection unusable.
    #[error("Fatal router error: {0}")]
    Fatal(String),

    /// No terminal reply within the per-command deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed data on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command rejected before anything was written.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl RouterError {
    /// Returns true if the connection can no longer be used after this error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RouterError::Io(_)
                | RouterError::ConnectTimeout(_)
                | RouterError::ConnectionClosed
                | RouterError::Fatal(_)
                | RouterError::Protocol(_)
        )
    }

    /// Returns true if the failure was limited to a single command.
    ///
    /// The session stays usable after these and the next command may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RouterError::Trap { .. } | RouterError::Timeout(_) | RouterError::InvalidCommand(_)
        )
    }
}

/// Result type alias using RouterError.
pub type Result<T> = std::result::Result<T, RouterError>;
