//! Tracing initialisation
//!
//! Installs a global `tracing-subscriber` fmt layer filtered by an `EnvFilter`. The
//! filter comes from `RUST_LOG` when set and otherwise from the configured level.
//!
//! # Example
//! ```no_run
//! use ctlkit_runtime::{logging, settings::RuntimeSettings};
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = RuntimeSettings::load(None::<&str>)?;
//! logging::init_tracing(&settings.logging)?;
//! tracing::info!("runtime starting");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::settings::LoggingSettings;

/// Output format for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, coloured (development).
    Pretty,
    /// Single-line, no colours.
    Compact,
    /// One JSON object per event (log aggregation).
    Json,
}

/// Tracing setup failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured level is not a tracing level.
    #[error("invalid log level '{0}': must be one of trace, debug, info, warn, error")]
    InvalidLevel(String),
    /// A global subscriber was already installed.
    #[error("tracing already initialised: {0}")]
    AlreadyInitialized(String),
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, LoggingError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// The filter that would be installed for `settings`.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    let level = parse_log_level(&settings.level)?;
    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase())))
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings)?;

    let layer = match settings.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(
            parse_log_level("verbose"),
            Err(LoggingError::InvalidLevel(_))
        ));
    }

    #[test]
    fn test_second_init_is_an_error() {
        let settings = LoggingSettings {
            level: "warn".into(),
            format: LogFormat::Compact,
        };
        // The first call may lose to another test; the second always fails.
        let _ = init_tracing(&settings);
        assert!(matches!(
            init_tracing(&settings),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_invalid_level_fails_before_install() {
        let settings = LoggingSettings {
            level: "chatty".into(),
            format: LogFormat::Json,
        };
        assert!(matches!(
            init_tracing(&settings),
            Err(LoggingError::InvalidLevel(_))
        ));
    }
}
