//! Immutable name-to-descriptor catalog.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use bridge_primitives::ToolName;
use serde_json::Value;
use tracing::warn;

use crate::descriptor::{InvocationMode, ToolDescriptor, ToolListing};
use crate::loader::{LoadDiagnostic, LoadFailure, LoadReport};
use crate::schema::ParameterSchema;
use crate::sink::ChunkSink;
use crate::tool::{ToolError, ToolResult, streaming_fn};

/// Mutable staging area used before a [`ToolCatalog`] is frozen.
#[derive(Default)]
pub struct CatalogBuilder {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for CatalogBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogBuilder")
            .field("registered", &self.tools.len())
            .finish()
    }
}

impl CatalogBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateTool`] if the name is already present; the
    /// existing registration is kept.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> ToolResult<()> {
        let name = descriptor.name().as_str().to_owned();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }

        self.index.insert(name, self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    /// Registers a synchronous native closure.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidMetadata`] for an invalid name and
    /// [`ToolError::DuplicateTool`] when the name is taken.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        parameters: ParameterSchema,
        tool: F,
    ) -> ToolResult<()>
    where
        F: Send + Sync + Fn(Value) -> Fut + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        let name = ToolName::new(name).map_err(|err| ToolError::InvalidMetadata {
            reason: err.to_string(),
        })?;
        self.register(
            ToolDescriptor::builder(name)
                .description(description)
                .parameters(parameters)
                .build(tool),
        )
    }

    /// Registers a native closure that streams chunks through its sink.
    ///
    /// # Errors
    ///
    /// Same as [`register_fn`](Self::register_fn).
    pub fn register_streaming<F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        parameters: ParameterSchema,
        tool: F,
    ) -> ToolResult<()>
    where
        F: Send + Sync + Fn(Value, ChunkSink) -> Fut + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        let name = ToolName::new(name).map_err(|err| ToolError::InvalidMetadata {
            reason: err.to_string(),
        })?;
        self.register(
            ToolDescriptor::builder(name)
                .description(description)
                .parameters(parameters)
                .mode(InvocationMode::Streaming)
                .build(streaming_fn(tool)),
        )
    }

    /// Registers every descriptor from a loader report.
    ///
    /// Returns the report's diagnostics plus one `DuplicateName` diagnostic for
    /// each descriptor that collided with an earlier registration.
    pub fn absorb(&mut self, report: LoadReport) -> Vec<LoadDiagnostic> {
        let (descriptors, mut diagnostics) = report.into_parts();
        for descriptor in descriptors {
            let source = descriptor.source().to_string();
            if let Err(ToolError::DuplicateTool { name }) = self.register(descriptor) {
                warn!(tool = %name, module = %source, "duplicate tool name rejected");
                diagnostics.push(LoadDiagnostic::new(
                    source.into(),
                    Some(name.clone()),
                    LoadFailure::DuplicateName { name },
                ));
            }
        }
        diagnostics
    }

    /// Freezes the catalog.
    #[must_use]
    pub fn build(self) -> ToolCatalog {
        ToolCatalog {
            tools: self.tools,
            index: self.index,
        }
    }
}

/// Read-only set of tools, shared across request handlers.
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.names().collect();
        f.debug_struct("ToolCatalog")
            .field("registered", &names)
            .finish()
    }
}

impl ToolCatalog {
    /// Starts a new builder.
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Returns the descriptor registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&idx| &self.tools[idx])
    }

    /// Resolves `name` to its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when no tool has that name.
    pub fn lookup(&self, name: &str) -> ToolResult<&ToolDescriptor> {
        self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_owned(),
        })
    }

    /// Lists every tool in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolListing> {
        self.tools.iter().map(ToolDescriptor::listing).collect()
    }

    /// Iterates the registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|descriptor| descriptor.name().as_str())
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
