//! Executable side of a tool.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::sink::ChunkSink;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Trait implemented by tool executors.
///
/// `input` is the validated argument object. Streaming tools emit partial
/// output through `sink` and return the final value.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invokes the tool with validated JSON arguments.
    async fn invoke(&self, input: Value, sink: ChunkSink) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> Tool for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, input: Value, _sink: ChunkSink) -> ToolResult<Value> {
        (self)(input).await
    }
}

/// Adapter turning a `Fn(Value, ChunkSink)` closure into a streaming [`Tool`].
#[derive(Clone)]
pub struct StreamingFn<F> {
    inner: F,
}

/// Wraps a closure that receives the chunk sink alongside its arguments.
#[must_use]
pub fn streaming_fn<F, Fut>(inner: F) -> StreamingFn<F>
where
    F: Send + Sync + Fn(Value, ChunkSink) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    StreamingFn { inner }
}

#[async_trait]
impl<F, Fut> Tool for StreamingFn<F>
where
    F: Send + Sync + Fn(Value, ChunkSink) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, input: Value, sink: ChunkSink) -> ToolResult<Value> {
        (self.inner)(input, sink).await
    }
}

/// Errors produced by tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool metadata failed validation.
    #[error("invalid tool metadata: {reason}")]
    InvalidMetadata {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool name collided with an existing registration.
    #[error("tool `{name}` is already registered")]
    DuplicateTool {
        /// Name of the offending tool.
        name: String,
    },

    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Tool reported a failure meant for the caller.
    #[error("tool execution failed: {reason}")]
    Execution {
        /// Message authored by the tool implementation.
        reason: String,
    },

    /// Failure whose details stay on the server, such as a crashed process.
    #[error("tool failed internally: {reason}")]
    Internal {
        /// Diagnostic detail for logs only.
        reason: String,
    },

    /// The consumer of a streaming invocation went away.
    #[error("invocation cancelled")]
    Cancelled,
}

impl ToolError {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// Creates an internal error from the supplied reason.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}
