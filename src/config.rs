//! Centralized configuration for the KMS encryption provider.
//!
//! All configuration is loaded from environment variables and validated
//! at startup.

use crate::error::ProviderError;
use crate::health::{DEFAULT_HEALTH_CHECK_PERIOD, DEFAULT_QUEUE_CAPACITY};
use crate::kms::{AwsKmsConfig, EncryptionContext};
use crate::telemetry::LogConfig;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// Default Unix socket the gRPC server listens on.
pub const DEFAULT_LISTEN_SOCKET: &str = "/var/run/kmsplugin/socket.sock";

/// Default address of the HTTP probe server.
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Key settings
    /// Key identifier handed to KMS
    pub key_id: String,
    /// Whether the key is customer managed
    pub is_customer_managed_key: bool,
    /// Encryption context attached to every KMS call
    pub encryption_context: Option<EncryptionContext>,
    /// AWS client settings
    pub kms: AwsKmsConfig,

    // Server settings
    /// Unix socket for the gRPC server
    pub listen_socket: PathBuf,
    /// Address of the HTTP probe server
    pub health_addr: SocketAddr,
    /// Grace period for draining servers on shutdown
    pub shutdown_timeout: Duration,

    // Health settings
    /// Length of one health evaluation window
    pub health_check_period: Duration,
    /// Capacity of the health signal queue
    pub health_queue_capacity: usize,

    // Observability
    /// Log settings
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    /// when present.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ProviderError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_id = lookup("KMS_KEY_ID")
            .ok_or_else(|| ProviderError::config("KMS_KEY_ID is required"))?;
        let is_customer_managed_key = parse_var(&lookup, "KMS_CUSTOMER_MANAGED_KEY", false)?;
        let encryption_context = match lookup("KMS_ENCRYPTION_CONTEXT") {
            Some(raw) => parse_encryption_context(&raw)?,
            None => None,
        };

        let kms = AwsKmsConfig {
            region: non_empty(lookup("AWS_REGION")),
            endpoint: non_empty(lookup("KMS_ENDPOINT")),
            retry_max_attempts: parse_var(&lookup, "KMS_RETRY_MAX_ATTEMPTS", 3)?,
            qps_limit: parse_var(&lookup, "KMS_QPS_LIMIT", 0)?,
            burst_limit: parse_var(&lookup, "KMS_BURST_LIMIT", 0)?,
        };

        let listen_socket = PathBuf::from(
            lookup("LISTEN_SOCKET").unwrap_or_else(|| DEFAULT_LISTEN_SOCKET.to_string()),
        );
        let health_addr = lookup("HEALTH_ADDR")
            .unwrap_or_else(|| DEFAULT_HEALTH_ADDR.to_string())
            .parse()
            .map_err(|e| ProviderError::config(format!("Invalid HEALTH_ADDR: {}", e)))?;
        let shutdown_timeout =
            Duration::from_secs(parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", 10)?);

        let health_check_period = Duration::from_secs(parse_var(
            &lookup,
            "HEALTH_CHECK_PERIOD_SECS",
            DEFAULT_HEALTH_CHECK_PERIOD.as_secs(),
        )?);
        let health_queue_capacity =
            parse_var(&lookup, "HEALTH_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;

        let log = LogConfig {
            level: parse_var(&lookup, "LOG_LEVEL", LevelFilter::INFO)?,
            json: parse_var(&lookup, "LOG_JSON", false)?,
        };

        let config = Self {
            key_id,
            is_customer_managed_key,
            encryption_context,
            kms,
            listen_socket,
            health_addr,
            shutdown_timeout,
            health_check_period,
            health_queue_capacity,
            log,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.key_id.trim().is_empty() {
            return Err(ProviderError::config("KMS_KEY_ID must not be empty"));
        }
        if self.health_check_period.is_zero() {
            return Err(ProviderError::config(
                "HEALTH_CHECK_PERIOD_SECS must be greater than zero",
            ));
        }
        if self.health_queue_capacity == 0 {
            return Err(ProviderError::config(
                "HEALTH_QUEUE_CAPACITY must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Parse an encryption context of the form `k1=v1,k2=v2`.
///
/// Whitespace around keys and values is trimmed. An empty string yields no
/// context.
///
/// # Errors
///
/// Returns an error for a pair without `=`, an empty key, or a duplicate key.
pub fn parse_encryption_context(raw: &str) -> Result<Option<EncryptionContext>, ProviderError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let mut context = EncryptionContext::new();
    for pair in raw.split(',') {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ProviderError::config(format!("Invalid KMS_ENCRYPTION_CONTEXT pair: {:?}", pair))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProviderError::config(
                "KMS_ENCRYPTION_CONTEXT contains an empty key",
            ));
        }
        if context.insert(key.to_string(), value.trim().to_string()).is_some() {
            return Err(ProviderError::config(format!(
                "KMS_ENCRYPTION_CONTEXT repeats key {:?}",
                key
            )));
        }
    }
    Ok(Some(context))
}

/// Parse a variable with a default value.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ProviderError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| ProviderError::config(format!("Invalid {}: {}", name, e))),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("KMS_KEY_ID", "alias/etcd")])).unwrap();
        assert_eq!(config.key_id, "alias/etcd");
        assert!(!config.is_customer_managed_key);
        assert!(config.encryption_context.is_none());
        assert_eq!(config.listen_socket, PathBuf::from(DEFAULT_LISTEN_SOCKET));
        assert_eq!(config.health_addr.port(), 8080);
        assert_eq!(config.health_check_period, DEFAULT_HEALTH_CHECK_PERIOD);
        assert_eq!(config.health_queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.kms.retry_max_attempts, 3);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("KMS_KEY_ID", "arn:aws:kms:us-west-2:123:key/abc"),
            ("KMS_CUSTOMER_MANAGED_KEY", "true"),
            ("AWS_REGION", "us-west-2"),
            ("KMS_ENDPOINT", "http://localhost:4566"),
            ("KMS_QPS_LIMIT", "20"),
            ("KMS_BURST_LIMIT", "40"),
            ("LISTEN_SOCKET", "/tmp/kms.sock"),
            ("HEALTH_ADDR", "127.0.0.1:9090"),
            ("HEALTH_CHECK_PERIOD_SECS", "5"),
            ("HEALTH_QUEUE_CAPACITY", "8"),
            ("LOG_LEVEL", "debug"),
            ("LOG_JSON", "true"),
        ]))
        .unwrap();

        assert!(config.is_customer_managed_key);
        assert_eq!(config.kms.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.kms.endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.kms.qps_limit, 20);
        assert_eq!(config.kms.burst_limit, 40);
        assert_eq!(config.listen_socket, PathBuf::from("/tmp/kms.sock"));
        assert_eq!(config.health_addr.port(), 9090);
        assert_eq!(config.health_check_period, Duration::from_secs(5));
        assert_eq!(config.health_queue_capacity, 8);
        assert_eq!(config.log.level, LevelFilter::DEBUG);
        assert!(config.log.json);
    }

    #[test]
    fn test_missing_key_id() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("KMS_KEY_ID"));
    }

    #[test]
    fn test_blank_key_id() {
        assert!(Config::from_lookup(lookup(&[("KMS_KEY_ID", "  ")])).is_err());
    }

    #[test]
    fn test_invalid_number() {
        let err = Config::from_lookup(lookup(&[
            ("KMS_KEY_ID", "k"),
            ("KMS_QPS_LIMIT", "fast"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("KMS_QPS_LIMIT"));
    }

    #[test]
    fn test_invalid_log_level() {
        let err = Config::from_lookup(lookup(&[("KMS_KEY_ID", "k"), ("LOG_LEVEL", "loud")]))
            .unwrap_err();
        assert!(err.to_string().contains("LOG_LEVEL"));
    }

    #[test]
    fn test_zero_period_and_capacity_rejected() {
        assert!(Config::from_lookup(lookup(&[
            ("KMS_KEY_ID", "k"),
            ("HEALTH_CHECK_PERIOD_SECS", "0"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup(&[
            ("KMS_KEY_ID", "k"),
            ("HEALTH_QUEUE_CAPACITY", "0"),
        ]))
        .is_err());
    }

    #[test]
    fn test_empty_region_is_unset() {
        let config =
            Config::from_lookup(lookup(&[("KMS_KEY_ID", "k"), ("AWS_REGION", "")])).unwrap();
        assert!(config.kms.region.is_none());
    }

    #[test]
    fn test_parse_encryption_context() {
        let context = parse_encryption_context("cluster=prod, team = infra")
            .unwrap()
            .unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context["cluster"], "prod");
        assert_eq!(context["team"], "infra");

        assert!(parse_encryption_context("").unwrap().is_none());
        assert!(parse_encryption_context("novalue").is_err());
        assert!(parse_encryption_context("=v").is_err());
        assert!(parse_encryption_context("a=1,a=2").is_err());
    }

    #[test]
    fn test_empty_value_allowed() {
        let context = parse_encryption_context("k=").unwrap().unwrap();
        assert_eq!(context["k"], "");
    }
}
