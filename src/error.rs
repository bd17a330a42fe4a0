//! Error types for admission control.

use thiserror::Error;

/// Main error type for admit operations.
#[derive(Error, Debug)]
pub enum AdmitError {
    /// Invalid limiter or service configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store could not serve a request
    #[error("Store error: {0}")]
    Store(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for admit operations.
pub type Result<T> = std::result::Result<T, AdmitError>;
