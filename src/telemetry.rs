//! Log output for the provider process.
//!
//! The provider's own events are logged at the configured level while the
//! AWS SDK, hyper and tonic stay at `warn`. `RUST_LOG` replaces the whole
//! filter when set.

use crate::error::ProviderError;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target prefix of every event emitted by this crate.
const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Log settings read from `LOG_LEVEL` and `LOG_JSON`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    /// Level applied to the provider's own events
    pub level: LevelFilter,
    /// One JSON object per line instead of human readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives used when `RUST_LOG` is unset.
    #[must_use]
    pub fn directives(&self) -> String {
        format!("{},{}={}", LevelFilter::WARN, CRATE_TARGET, self.level)
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), ProviderError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ProviderError::Logging(e.to_string()))
}
