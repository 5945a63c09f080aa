//! AWS KMS client with optional client-side rate limiting.
//!
//! Service errors are reduced to their code and message exactly once, here,
//! so classification never has to know about SDK error types.

use crate::kms::{EncryptionContext, KmsClient, KmsError};
use async_trait::async_trait;
use aws_sdk_kms::config::retry::RetryConfig;
use aws_sdk_kms::config::Region;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::{debug, info};

/// AWS KMS configuration.
#[derive(Debug, Clone)]
pub struct AwsKmsConfig {
    /// AWS region, falls back to the SDK provider chain when unset.
    pub region: Option<String>,
    /// Endpoint override, e.g. a VPC endpoint or local emulator.
    pub endpoint: Option<String>,
    /// Maximum attempts per request, including the first one.
    pub retry_max_attempts: u32,
    /// Requests per second allowed towards KMS, 0 disables limiting.
    pub qps_limit: u32,
    /// Burst allowance on top of `qps_limit`, 0 means same as `qps_limit`.
    pub burst_limit: u32,
}

impl Default for AwsKmsConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            retry_max_attempts: 3,
            qps_limit: 0,
            burst_limit: 0,
        }
    }
}

/// [`KmsClient`] backed by the AWS SDK.
pub struct AwsKms {
    client: aws_sdk_kms::Client,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl AwsKms {
    /// Build a client from the ambient AWS configuration plus overrides.
    pub async fn new(config: &AwsKmsConfig) -> Self {
        let retry = RetryConfig::standard().with_max_attempts(config.retry_max_attempts.max(1));
        let mut loader =
            aws_config::defaults(aws_config::BehaviorVersion::latest()).retry_config(retry);
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        let limiter = NonZeroU32::new(config.qps_limit).map(|qps| {
            let burst = NonZeroU32::new(config.burst_limit).unwrap_or(qps);
            RateLimiter::direct(Quota::per_second(qps).allow_burst(burst))
        });

        info!(
            region = ?sdk_config.region(),
            endpoint = ?config.endpoint,
            qps_limit = config.qps_limit,
            "Configured AWS KMS client"
        );

        Self {
            client: aws_sdk_kms::Client::new(&sdk_config),
            limiter,
        }
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

fn from_sdk_error<E, R>(err: SdkError<E, R>) -> KmsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if let Some(code) = err.as_service_error().and_then(|e| e.code()) {
        let message = err
            .as_service_error()
            .and_then(|e| e.message())
            .unwrap_or_default();
        return KmsError::api(code, message);
    }
    KmsError::other(DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl KmsClient for AwsKms {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        key_id: &str,
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>, KmsError> {
        self.throttle().await;
        let output = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext))
            .set_encryption_context(context.cloned())
            .send()
            .await
            .map_err(from_sdk_error)?;

        debug!(key_id, "KMS encrypt succeeded");
        output
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KmsError::other("KMS encrypt response has no ciphertext"))
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        key_id: &str,
        context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>, KmsError> {
        self.throttle().await;
        let output = self
            .client
            .decrypt()
            .key_id(key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .set_encryption_context(context.cloned())
            .send()
            .await
            .map_err(from_sdk_error)?;

        debug!(key_id, "KMS decrypt succeeded");
        output
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KmsError::other("KMS decrypt response has no plaintext"))
    }
}
