//! Error types for relaybot

use thiserror::Error;

/// Result type alias for relaybot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relaybot
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Transient completion-API failure (network, timeout, error status)
    #[error("completion API error: {0}")]
    Api(String),

    /// Unexpected completion-API payload shape
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    /// Channel error
    #[error("channel error: {0}")]
    Channel(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
