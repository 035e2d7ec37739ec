//! Tracing subscriber setup for binaries embedding the relay.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the host installs a subscriber, either its own or one from [`init_subscriber`].

use crate::error::Error;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
        }
    }
}

impl SubscriberConfig {
    /// Read `CONVERSE_RELAY_LOG_LEVEL` and `CONVERSE_RELAY_LOG_FORMAT`.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("CONVERSE_RELAY_LOG_LEVEL") {
            config.log_level = level
                .parse()
                .map_err(|_| Error::Config(format!("invalid log level: {level}")))?;
        }

        if let Ok(format) = std::env::var("CONVERSE_RELAY_LOG_FORMAT") {
            config.output_format = match format.to_lowercase().as_str() {
                "text" => OutputFormat::Text,
                "json" => OutputFormat::Json,
                _ => return Err(Error::Config(format!("invalid log format: {format}"))),
            };
        }

        Ok(config)
    }

    /// Filter directive used when `RUST_LOG` is unset.
    fn directive(&self) -> String {
        format!("converse_relay={}", self.log_level)
    }
}

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over the
/// configured level. An already installed subscriber is left in place.
pub fn init_subscriber(config: &SubscriberConfig) -> Result<(), Error> {
    if tracing::dispatcher::has_been_set() {
        tracing::debug!("global subscriber already installed; keeping it");
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.directive()));

    let result = match config.output_format {
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("failed to initialize tracing: {e}")))
}
