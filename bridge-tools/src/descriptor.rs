//! Tool descriptors and their discovery listings.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bridge_primitives::ToolName;
use serde::{Deserialize, Serialize};

use crate::schema::{ParameterSchema, ValueType};
use crate::tool::Tool;

/// Whether a tool returns one value or a sequence of chunks first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// Single final value.
    #[default]
    Synchronous,
    /// Chunks followed by a final value.
    Streaming,
}

/// Where a descriptor came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolSource {
    /// Declared in a manifest file.
    Manifest(PathBuf),
    /// Registered from Rust code.
    Native,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest(path) => write!(f, "{}", path.display()),
            Self::Native => f.write_str("native"),
        }
    }
}

/// Everything the bridge knows about one invocable tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: ToolName,
    description: String,
    parameters: ParameterSchema,
    returns: ValueType,
    mode: InvocationMode,
    timeout: Option<Duration>,
    source: ToolSource,
    tool: Arc<dyn Tool>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Starts building a descriptor for `name`.
    #[must_use]
    pub fn builder(name: ToolName) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder {
            name,
            description: String::new(),
            parameters: ParameterSchema::empty(),
            returns: ValueType::Any,
            mode: InvocationMode::Synchronous,
            timeout: None,
            source: ToolSource::Native,
        }
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &ToolName {
        &self.name
    }

    /// Returns the description shown to clients.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the parameter schema.
    #[must_use]
    pub fn parameters(&self) -> &ParameterSchema {
        &self.parameters
    }

    /// Returns the declared result type.
    #[must_use]
    pub const fn returns(&self) -> ValueType {
        self.returns
    }

    /// Returns the invocation mode.
    #[must_use]
    pub const fn mode(&self) -> InvocationMode {
        self.mode
    }

    /// Returns the per-tool timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns where the descriptor was declared.
    #[must_use]
    pub fn source(&self) -> &ToolSource {
        &self.source
    }

    /// Returns the executable unit.
    #[must_use]
    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    /// Returns the client-facing summary.
    #[must_use]
    pub fn listing(&self) -> ToolListing {
        ToolListing {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            returns: self.returns,
            streaming: self.mode == InvocationMode::Streaming,
        }
    }
}

/// Builder for [`ToolDescriptor`].
#[derive(Debug)]
pub struct ToolDescriptorBuilder {
    name: ToolName,
    description: String,
    parameters: ParameterSchema,
    returns: ValueType,
    mode: InvocationMode,
    timeout: Option<Duration>,
    source: ToolSource,
}

impl ToolDescriptorBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the declared result type.
    #[must_use]
    pub fn returns(mut self, returns: ValueType) -> Self {
        self.returns = returns;
        self
    }

    /// Sets the invocation mode.
    #[must_use]
    pub fn mode(mut self, mode: InvocationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the dispatcher's default timeout for this tool.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Records where the tool was declared.
    #[must_use]
    pub fn source(mut self, source: ToolSource) -> Self {
        self.source = source;
        self
    }

    /// Finishes the descriptor with the given executor.
    #[must_use]
    pub fn build<T>(self, tool: T) -> ToolDescriptor
    where
        T: Tool + 'static,
    {
        self.build_shared(Arc::new(tool))
    }

    /// Finishes the descriptor with an already shared executor.
    #[must_use]
    pub fn build_shared(self, tool: Arc<dyn Tool>) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name,
            description: self.description,
            parameters: self.parameters,
            returns: self.returns,
            mode: self.mode,
            timeout: self.timeout,
            source: self.source,
            tool,
        }
    }
}

/// Discovery entry for one tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolListing {
    /// Tool name.
    pub name: ToolName,
    /// Description shown to clients.
    pub description: String,
    /// Ordered parameter declarations.
    pub parameters: ParameterSchema,
    /// Declared result type.
    pub returns: ValueType,
    /// `true` for streaming tools.
    pub streaming: bool,
}
