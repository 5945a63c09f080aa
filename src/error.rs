//! Process-level errors.

use thiserror::Error;

/// Errors raised while configuring or running the provider process.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// gRPC transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Global log subscriber could not be installed
    #[error("Logging setup error: {0}")]
    Logging(String),

    /// Socket or file system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        ProviderError::Config(msg.into())
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        ProviderError::Transport(msg.into())
    }
}

impl From<tonic::transport::Error> for ProviderError {
    fn from(err: tonic::transport::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}
