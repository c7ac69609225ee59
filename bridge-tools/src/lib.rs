//! Tool descriptors, argument validation, and the immutable tool catalog.
//!
//! Tools are either declared in `*.toml` manifests inside a tools directory and
//! picked up by [`loader::ToolLoader`], or registered natively through
//! [`catalog::CatalogBuilder`]. Once built, a [`catalog::ToolCatalog`] never
//! changes for the lifetime of the server.

#![warn(missing_docs, clippy::pedantic)]

pub mod catalog;
pub mod descriptor;
pub mod loader;
pub mod schema;
pub mod sink;
pub mod tool;

pub use catalog::{CatalogBuilder, ToolCatalog};
pub use descriptor::{InvocationMode, ToolDescriptor, ToolDescriptorBuilder, ToolListing, ToolSource};
pub use schema::{
    ArgumentPolicy, ParameterSchema, ParameterSpec, SchemaError, ValidationError,
    ValidationProblem, ValueType,
};
pub use sink::{Chunk, ChunkKind, ChunkSink};
pub use tool::{StreamingFn, Tool, ToolError, ToolResult, streaming_fn};
