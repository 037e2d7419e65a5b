//! # Error Types
//!
//! Custom error types for Grove Link using `thiserror`.

use thiserror::Error;

/// Main error type for Grove Link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport could not be opened at link start
    #[error("Failed to open {endpoint}: {reason}")]
    TransportOpen { endpoint: String, reason: String },

    /// Transport failed mid-session
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// A link is already running for this session
    #[error("Link already running on {0}")]
    AlreadyRunning(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Grove Link
pub type Result<T> = std::result::Result<T, LinkError>;
