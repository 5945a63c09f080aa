//! KMS plugin instance shared by both wire API versions.
//!
//! A [`Plugin`] wraps one key. It forwards encrypt/decrypt to the remote
//! service, classifies failures, feeds the shared [`HealthAggregator`], and
//! keeps its own last classification for the liveness probe.

pub mod v1;
pub mod v2;

pub use v1::V1Service;
pub use v2::V2Service;

use crate::classify::{classify, ErrorCategory};
use crate::health::{ClassifiedError, HealthAggregator};
use crate::kms::{EncryptionContext, KmsClient, KmsError};
use crate::metrics;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};

/// Prefix of every ciphertext written by this plugin.
pub const STORAGE_VERSION: &str = "1";

/// Errors returned by plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The remote service failed. The error is passed through unchanged.
    #[error(transparent)]
    Kms(#[from] KmsError),

    /// Ciphertext was not written by a known storage version.
    #[error("ciphertext does not start with storage version {expected:?}")]
    InvalidStorageVersion {
        /// Marker that was expected.
        expected: &'static str,
    },
}

impl From<PluginError> for tonic::Status {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Kms(e) => tonic::Status::internal(e.to_string()),
            e @ PluginError::InvalidStorageVersion { .. } => {
                tonic::Status::invalid_argument(e.to_string())
            }
        }
    }
}

/// One configured key, independent of the wire API version serving it.
pub struct Plugin {
    key_id: String,
    is_customer_managed_key: bool,
    kms: Arc<dyn KmsClient>,
    encryption_context: Option<EncryptionContext>,
    health: Arc<HealthAggregator>,
    last_error: ArcSwapOption<ClassifiedError>,
    api_version: &'static str,
}

impl Plugin {
    /// Create an instance for `key_id` reporting into `health`.
    #[must_use]
    pub fn new(
        key_id: impl Into<String>,
        kms: Arc<dyn KmsClient>,
        encryption_context: Option<EncryptionContext>,
        health: Arc<HealthAggregator>,
        is_customer_managed_key: bool,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            is_customer_managed_key,
            kms,
            encryption_context,
            health,
            last_error: ArcSwapOption::empty(),
            api_version: "v2",
        }
    }

    /// Label metrics with the wire API version serving this instance.
    #[must_use]
    pub fn with_api_version(mut self, api_version: &'static str) -> Self {
        self.api_version = api_version;
        self
    }

    /// Key identifier handed to the remote service.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Encrypt `plaintext`, returning the storage version followed by the
    /// remote ciphertext.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    #[instrument(skip(self, plaintext), fields(key_id = %self.key_id, version = self.api_version))]
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PluginError> {
        let start = Instant::now();
        let result = self
            .kms
            .encrypt(plaintext, &self.key_id, self.encryption_context.as_ref())
            .await;
        let blob = self.observe("encrypt", start, result)?;

        let mut ciphertext = Vec::with_capacity(STORAGE_VERSION.len() + blob.len());
        ciphertext.extend_from_slice(STORAGE_VERSION.as_bytes());
        ciphertext.extend_from_slice(&blob);
        Ok(ciphertext)
    }

    /// Strip the storage version and decrypt the remainder remotely.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidStorageVersion`] without calling the
    /// remote service when the marker is missing, otherwise the remote error
    /// unchanged.
    #[instrument(skip(self, ciphertext), fields(key_id = %self.key_id, version = self.api_version))]
    pub async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, PluginError> {
        let Some(blob) = ciphertext.strip_prefix(STORAGE_VERSION.as_bytes()) else {
            warn!("Rejecting ciphertext without storage version prefix");
            return Err(PluginError::InvalidStorageVersion {
                expected: STORAGE_VERSION,
            });
        };

        let start = Instant::now();
        let result = self
            .kms
            .decrypt(blob, &self.key_id, self.encryption_context.as_ref())
            .await;
        self.observe("decrypt", start, result)
            .map_err(PluginError::from)
    }

    /// Aggregate, time-windowed health shared by every instance on the same
    /// aggregator.
    ///
    /// # Errors
    ///
    /// Returns the representative failure of the current window.
    pub fn health(&self) -> Result<(), ClassifiedError> {
        self.health.verdict()
    }

    /// Instantaneous liveness of this instance. Administrator-caused
    /// failures are ignored so a misconfigured key does not cause restarts.
    ///
    /// # Errors
    ///
    /// Returns the last failure when a restart could plausibly fix it.
    pub fn live(&self) -> Result<(), ClassifiedError> {
        match self.last_error.load_full() {
            Some(err) if err.category.fails_liveness() => Err(err.as_ref().clone()),
            _ => Ok(()),
        }
    }

    /// Category of the last remote call, `Nil` after a success.
    #[must_use]
    pub fn last_category(&self) -> ErrorCategory {
        self.last_error
            .load_full()
            .map_or(ErrorCategory::Nil, |err| err.category)
    }

    fn observe(
        &self,
        operation: &'static str,
        start: Instant,
        result: Result<Vec<u8>, KmsError>,
    ) -> Result<Vec<u8>, KmsError> {
        metrics::record_kms_operation(
            &self.key_id,
            operation,
            self.api_version,
            result.is_ok(),
            start.elapsed().as_secs_f64(),
        );

        let err = match result {
            Ok(output) => {
                self.last_error.store(None);
                return Ok(output);
            }
            Err(err) => err,
        };

        let category = classify(Some(&err), self.is_customer_managed_key);
        metrics::record_kms_error(operation, category.as_str());
        warn!(operation, category = %category, error = %err, "KMS operation failed");

        let signal = ClassifiedError::new(category, &err);
        self.health.push(signal.clone());
        self.last_error.store(Some(Arc::new(signal)));
        Err(err)
    }
}
