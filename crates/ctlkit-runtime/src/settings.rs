//! Runtime settings using Figment
//!
//! Settings are layered, later layers overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `CTLKIT_`, with `__` separating nested keys
//!    (e.g. `CTLKIT_LOGGING__LEVEL=debug`, `CTLKIT_RUNTIME__SHUTDOWN_TIMEOUT_MS=500`)
//!
//! # Example
//! ```no_run
//! use ctlkit_runtime::settings::RuntimeSettings;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = RuntimeSettings::load(Some("ctlkit.toml"))?;
//! println!("log level: {}", settings.logging.level);
//! # Ok(())
//! # }
//! ```
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "compact"
//!
//! [runtime]
//! shutdown_timeout_ms = 2000
//! ```

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::logging::{parse_log_level, LogFormat};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CTLKIT_";

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Tracing output.
    pub logging: LoggingSettings,
    /// Task execution.
    pub runtime: RunnerSettings,
}

/// Tracing output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum level: trace, debug, info, warn or error. `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Task execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Upper bound on the root controller's `close` during teardown.
    pub shutdown_timeout_ms: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 5000,
        }
    }
}

impl RunnerSettings {
    /// Shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl RuntimeSettings {
    /// The layered provider chain, without extracting.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RuntimeSettings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate settings, reading `path` if given.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let path: Option<&Path> = path.as_ref().map(|p| p.as_ref());
        if let Some(path) = path {
            if !path.exists() {
                bail!("settings file {} does not exist", path.display());
            }
        }
        let settings: Self = Self::figment(path)
            .extract()
            .context("failed to load runtime settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.logging.level)?;
        if self.runtime.shutdown_timeout_ms == 0 {
            bail!("runtime.shutdown_timeout_ms must be positive");
        }
        Ok(())
    }

    /// Render as TOML, e.g. to write a starting configuration file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize runtime settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.logging.format, LogFormat::Pretty);
        assert_eq!(
            settings.runtime.shutdown_timeout(),
            Duration::from_millis(5000)
        );
        settings.validate().unwrap();
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[logging]\nlevel = \"debug\"\nformat = \"json\"\n\n[runtime]\nshutdown_timeout_ms = 250"
        )
        .unwrap();

        let settings = RuntimeSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.runtime.shutdown_timeout_ms, 250);
    }

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nshutdown_timeout_ms = 100").unwrap();

        let settings = RuntimeSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.logging, LoggingSettings::default());
        assert_eq!(settings.runtime.shutdown_timeout_ms, 100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"loud\"").unwrap();
        assert!(RuntimeSettings::load(Some(file.path())).is_err());

        assert!(RuntimeSettings::load(Some("/nonexistent/ctlkit.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = RuntimeSettings::default();
        let text = settings.to_toml().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctlkit.toml");
        std::fs::write(&path, text).unwrap();
        assert_eq!(RuntimeSettings::load(Some(&path)).unwrap(), settings);
    }
}
