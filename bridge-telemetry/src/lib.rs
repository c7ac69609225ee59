//! Logging setup for the tool server.
//!
//! Installs a `tracing` fmt subscriber filtered by `RUST_LOG`, falling back to
//! the configured level. Installation is idempotent so tests and embedders can
//! call [`init_tracing`] freely.

#![warn(missing_docs, clippy::pedantic)]

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Default single-line format.
    #[default]
    Full,
    /// Compact lines without span context.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    default_level: Level,
    format: LogFormat,
    with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            format: LogFormat::Full,
            with_target: false,
        }
    }
}

impl TelemetryConfig {
    /// Sets the level used when `RUST_LOG` is unset or invalid.
    #[must_use]
    pub const fn with_default_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Includes the event target (module path) in each line.
    #[must_use]
    pub const fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Level used when `RUST_LOG` is unset or invalid.
    #[must_use]
    pub const fn default_level(&self) -> Level {
        self.default_level
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_level.as_str().to_ascii_lowercase()))
    }
}

/// Unrecognised log level name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level `{0}`; expected trace, debug, info, warn, or error")]
pub struct UnknownLevel(pub String);

/// Parses a level name such as `info` or `WARN`.
///
/// # Errors
///
/// Returns [`UnknownLevel`] for anything other than the five `tracing` levels.
pub fn parse_level(raw: &str) -> Result<Level, UnknownLevel> {
    Level::from_str(raw.trim()).map_err(|_| UnknownLevel(raw.to_owned()))
}

/// Installs the global subscriber.
///
/// Returns `false` when a subscriber was already installed, which is not an
/// error.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let builder = fmt()
        .with_env_filter(config.filter())
        .with_target(config.with_target)
        .with_level(true);
    let installed = match config.format {
        LogFormat::Full => builder.try_init().is_ok(),
        LogFormat::Compact => builder.compact().try_init().is_ok(),
    };
    if installed {
        tracing::debug!(level = %config.default_level, "tracing initialised");
    }
    installed
}
