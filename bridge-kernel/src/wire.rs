//! JSON bodies exchanged with remote clients.

use bridge_primitives::ServerManifest;
use bridge_tools::{Chunk, ChunkKind, ToolListing};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invocation request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Name of the tool to run.
    pub tool_name: String,
    /// Argument object; missing or `null` means no arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Successful synchronous invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Value returned by the tool.
    pub result: Value,
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid credential, or a disallowed origin.
    AuthError,
    /// No tool with the requested name.
    NotFound,
    /// Arguments or request body rejected.
    ValidationError,
    /// Tool failed, panicked, timed out, or was cancelled.
    ExecutionError,
    /// Server is shutting down.
    Unavailable,
}

impl ErrorKind {
    /// Wire name, as serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthError => "auth_error",
            Self::NotFound => "not_found",
            Self::ValidationError => "validation_error",
            Self::ExecutionError => "execution_error",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Error category plus a client-safe message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

/// Error envelope returned for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error detail.
    pub error: ErrorBody,
}

impl From<ErrorBody> for ErrorResponse {
    fn from(error: ErrorBody) -> Self {
        Self { error }
    }
}

/// One event of a streaming invocation.
///
/// Zero or more delta frames are followed by exactly one terminal `done` or
/// `error` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFrame {
    /// User-visible output text.
    OutputDelta {
        /// Text fragment.
        delta: String,
    },
    /// Fragment of arguments for a nested tool call.
    ToolArgumentDelta {
        /// JSON fragment.
        delta: String,
    },
    /// Invocation failed.
    Error {
        /// Failure detail.
        error: ErrorBody,
    },
    /// Invocation finished.
    Done {
        /// Final value returned by the tool.
        result: Value,
    },
}

impl StreamFrame {
    /// Wire name of the frame kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OutputDelta { .. } => "output_delta",
            Self::ToolArgumentDelta { .. } => "tool_argument_delta",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// Returns `true` for `done` and `error` frames.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

impl From<Chunk> for StreamFrame {
    fn from(chunk: Chunk) -> Self {
        match chunk.kind {
            ChunkKind::OutputDelta => Self::OutputDelta { delta: chunk.delta },
            ChunkKind::ToolArgumentDelta => Self::ToolArgumentDelta { delta: chunk.delta },
        }
    }
}

/// Discovery listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Server identity.
    pub server: ServerManifest,
    /// Tools in registration order.
    pub tools: Vec<ToolListing>,
}

/// Liveness report served without authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` while serving, `draining` or `stopped` during shutdown.
    pub status: String,
    /// Advertised server name.
    pub server: String,
    /// Number of tools in the catalog.
    pub tools: usize,
    /// Invocations admitted but not yet finished.
    pub in_flight: usize,
}
