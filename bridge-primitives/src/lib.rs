//! Core shared types for the toolbridge workspace.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod manifest;
mod name;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Per-request correlation identifier.
pub use ids::RequestId;
/// Server identity advertised through discovery.
pub use manifest::{ServerManifest, ServerManifestBuilder};
/// Validated tool identifier.
pub use name::ToolName;
