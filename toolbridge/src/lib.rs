//! Serve a directory of tools over authenticated HTTP and SSE.
//!
//! This crate bundles the bridge crates behind feature flags. Embedders that
//! only need the catalog or the dispatcher can disable the server and CLI.

#![warn(missing_docs, clippy::pedantic)]

/// Identifiers and server identity.
pub use bridge_primitives as primitives;

/// Tool loading, schemas, and the catalog (enabled by `tools` feature).
#[cfg(feature = "tools")]
pub use bridge_tools as tools;

/// Startup configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use bridge_config as config;

/// Logging setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use bridge_telemetry as telemetry;

/// Auth gate, dispatcher, and lifecycle (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use bridge_kernel as kernel;

/// HTTP transport (enabled by `server` feature).
#[cfg(feature = "server")]
pub use bridge_server as server;
