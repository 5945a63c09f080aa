//! Remote key-management capability.
//!
//! The plugin never performs encryption itself. It hands plaintext and
//! ciphertext to a [`KmsClient`] and only interprets the errors it returns.

pub mod aws;
pub mod mock;

pub use aws::{AwsKms, AwsKmsConfig};
pub use mock::MockKms;

use async_trait::async_trait;
use std::collections::HashMap;

/// Encryption context forwarded verbatim to the remote service.
pub type EncryptionContext = HashMap<String, String>;

/// Errors returned by a [`KmsClient`].
///
/// `Api` carries a structured service error whose code can be inspected.
/// Transport failures and wrapped errors are `Other`, which never exposes a
/// code whatever its text says.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KmsError {
    /// Structured error reported by the key-management service.
    #[error("api error {code}: {message}")]
    Api {
        /// Service error code, e.g. `DisabledException`.
        code: String,
        /// Human readable message supplied by the service.
        message: String,
    },

    /// Error without an extractable service code.
    #[error("{0}")]
    Other(String),
}

impl KmsError {
    /// Create a structured service error.
    #[must_use]
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        KmsError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create an opaque error.
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        KmsError::Other(msg.into())
    }

    /// Service error code, only present for structured errors.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            KmsError::Api { code, .. } => Some(code),
            KmsError::Other(_) => None,
        }
    }

    /// Error message without the code prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            KmsError::Api { message, .. } => message,
            KmsError::Other(msg) => msg,
        }
    }
}

/// Remote key-management operations consumed by the plugin.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Encrypt `plaintext` under `key_id`.
    async fn encrypt(
        &self,
        plaintext: &[u8],
        key_id: &str,
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>, KmsError>;

    /// Decrypt a ciphertext blob previously produced under `key_id`.
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        key_id: &str,
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>, KmsError>;
}
