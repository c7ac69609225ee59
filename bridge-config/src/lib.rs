//! Startup configuration for the tool server.
//!
//! [`ServerConfig`] is assembled once through [`ServerConfigBuilder`] and is
//! immutable afterwards. Every value is validated before the server binds, so
//! a bad tools directory or a malformed origin list fails fast.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod origins;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use origins::{AllowedOrigins, OriginPattern};
pub use schema::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SERVER_NAME, DEFAULT_TOKEN_ENV, ServerConfig,
    ServerConfigBuilder,
};
