//! Tracing subscriber setup.

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

use crate::config::{LogFormat, LoggingConfig};

/// Logging initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log level directive: {0}")]
    Filter(#[from] ParseError),
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Filter from `RUST_LOG` if set, otherwise from the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.level)?),
    }
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;
    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .try_init(),
    };
    installed.map_err(|_| TelemetryError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_parses() {
        let config = LoggingConfig {
            level: "fabricd=debug,fabric_metrics=info".into(),
            ..LoggingConfig::default()
        };
        assert!(env_filter(&config).is_ok());
    }
}
