//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Invalid startup configuration. Always fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Tools directory is unusable.
    #[error("tools directory `{}` {reason}", path.display())]
    ToolsDirectory {
        /// Configured path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// Host cannot be bound.
    #[error("invalid host `{host}`")]
    InvalidHost {
        /// Configured host.
        host: String,
    },

    /// Token environment variable name is unusable.
    #[error("invalid token environment variable `{name}`: {reason}")]
    InvalidTokenVariable {
        /// Configured name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Server name is empty.
    #[error("server name cannot be empty")]
    EmptyServerName,

    /// An allowed-origin entry is malformed.
    #[error("invalid origin `{origin}`: {reason}")]
    InvalidOrigin {
        /// Offending entry.
        origin: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Concurrency limit is zero.
    #[error("max concurrency must be greater than zero")]
    InvalidConcurrency,
}
