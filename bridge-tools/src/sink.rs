//! Partial output emitted by streaming tools.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::tool::{ToolError, ToolResult};

/// Kind of incremental output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Fragment of the tool's textual output.
    OutputDelta,
    /// Fragment of arguments the tool is assembling for a downstream call.
    ToolArgumentDelta,
}

/// One piece of partial output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// What the delta represents.
    pub kind: ChunkKind,
    /// Text fragment.
    pub delta: String,
}

impl Chunk {
    /// Output text fragment.
    #[must_use]
    pub fn output(delta: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::OutputDelta,
            delta: delta.into(),
        }
    }

    /// Tool-argument fragment.
    #[must_use]
    pub fn tool_argument(delta: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::ToolArgumentDelta,
            delta: delta.into(),
        }
    }
}

/// Handle a tool uses to emit chunks during an invocation.
///
/// Synchronous invocations receive a discarding sink, so tools can emit
/// unconditionally. A sink is owned by exactly one invocation; the consumer
/// sees the end of the chunk sequence once the sink is dropped.
#[derive(Debug)]
pub struct ChunkSink {
    tx: Option<mpsc::Sender<Chunk>>,
}

impl ChunkSink {
    /// Creates a connected sink and the receiver that observes its chunks.
    #[must_use]
    pub fn channel(capacity: NonZeroUsize) -> (Self, mpsc::Receiver<Chunk>) {
        let (tx, rx) = mpsc::channel(capacity.get());
        (Self { tx: Some(tx) }, rx)
    }

    /// Creates a sink that drops every chunk.
    #[must_use]
    pub const fn discard() -> Self {
        Self { tx: None }
    }

    /// Returns `true` when somebody is consuming the chunks.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Emits a chunk, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Cancelled`] once the consumer has gone away; tools
    /// should stop work when they see it.
    pub async fn emit(&self, chunk: Chunk) -> ToolResult<()> {
        match &self.tx {
            None => Ok(()),
            Some(tx) => tx.send(chunk).await.map_err(|_| ToolError::Cancelled),
        }
    }

    /// Emits an output fragment.
    ///
    /// # Errors
    ///
    /// See [`ChunkSink::emit`].
    pub async fn output_delta(&self, delta: impl Into<String>) -> ToolResult<()> {
        self.emit(Chunk::output(delta)).await
    }

    /// Emits a tool-argument fragment.
    ///
    /// # Errors
    ///
    /// See [`ChunkSink::emit`].
    pub async fn tool_argument_delta(&self, delta: impl Into<String>) -> ToolResult<()> {
        self.emit(Chunk::tool_argument(delta)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn delivers_chunks_in_order() {
        let (sink, mut rx) = ChunkSink::channel(capacity(4));
        sink.output_delta("A").await.unwrap();
        sink.tool_argument_delta("{\"q\":").await.unwrap();
        sink.output_delta("B").await.unwrap();
        drop(sink);

        let mut seen = Vec::new();
        while let Some(chunk) = rx.recv().await {
            seen.push(chunk);
        }
        assert_eq!(
            seen,
            vec![
                Chunk::output("A"),
                Chunk::tool_argument("{\"q\":"),
                Chunk::output("B"),
            ]
        );
    }

    #[tokio::test]
    async fn discard_sink_accepts_everything() {
        let sink = ChunkSink::discard();
        assert!(!sink.is_connected());
        sink.output_delta("ignored").await.unwrap();
    }

    #[tokio::test]
    async fn reports_cancellation_when_consumer_leaves() {
        let (sink, rx) = ChunkSink::channel(capacity(1));
        assert!(sink.is_connected());
        drop(rx);

        assert!(!sink.is_connected());
        let err = sink.output_delta("late").await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[test]
    fn chunk_wire_shape() {
        let json = serde_json::to_value(Chunk::output("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "output_delta", "delta": "hi" }));
    }
}
