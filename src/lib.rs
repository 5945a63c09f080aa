//! Encryption-at-rest provider backed by AWS KMS.
//!
//! Serves the Kubernetes KMS plugin APIs (v1beta1 and v2) over a Unix
//! socket, classifies remote failures, and exposes aggregate health and
//! instantaneous liveness to probes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod config;
pub mod error;
pub mod health;
pub mod kms;
pub mod metrics;
pub mod plugin;
pub mod probes;
pub mod server;
pub mod shutdown;
pub mod telemetry;

/// Generated protocol types.
#[allow(missing_docs)]
pub mod proto {
    /// KMS plugin API v1beta1.
    pub mod v1beta1 {
        tonic::include_proto!("v1beta1");
    }
    /// KMS plugin API v2.
    pub mod v2 {
        tonic::include_proto!("v2");
    }
}

pub use classify::{classify, ErrorCategory};
pub use config::Config;
pub use error::ProviderError;
pub use health::{ClassifiedError, HealthAggregator};
pub use kms::{KmsClient, KmsError};
pub use plugin::{Plugin, PluginError, V1Service, V2Service, STORAGE_VERSION};
