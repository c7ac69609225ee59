//! Hooks notified when an invocation finishes.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bridge_primitives::RequestId;
use tracing::{debug, info, warn};

use crate::wire::ErrorKind;

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// Tool returned a value.
    Completed,
    /// Request failed with the given category.
    Failed(ErrorKind),
    /// Stream consumer went away before the terminal frame.
    Abandoned,
}

/// Summary of one dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    /// Request correlation id.
    pub request_id: RequestId,
    /// Requested tool name, as sent by the client.
    pub tool: String,
    /// `true` for streaming requests.
    pub streaming: bool,
    /// Final outcome.
    pub outcome: InvocationOutcome,
    /// Chunks delivered to the client.
    pub chunks: usize,
    /// Time from dispatch to outcome.
    pub elapsed: Duration,
}

/// Observer trait used to capture invocation outcomes (for logging, metrics, etc.).
pub trait InvocationObserver: Send + Sync {
    /// Records a finished invocation.
    fn on_invocation(&self, record: &InvocationRecord);
}

/// Observer that logs to tracing.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl InvocationObserver for TracingObserver {
    fn on_invocation(&self, record: &InvocationRecord) {
        let elapsed_ms = u64::try_from(record.elapsed.as_millis()).unwrap_or(u64::MAX);
        match record.outcome {
            InvocationOutcome::Completed => info!(
                request_id = %record.request_id,
                tool = %record.tool,
                streaming = record.streaming,
                chunks = record.chunks,
                elapsed_ms,
                "tool invocation completed"
            ),
            InvocationOutcome::Failed(ErrorKind::ExecutionError) => warn!(
                request_id = %record.request_id,
                tool = %record.tool,
                streaming = record.streaming,
                elapsed_ms,
                "tool invocation failed"
            ),
            InvocationOutcome::Failed(kind) => debug!(
                request_id = %record.request_id,
                tool = %record.tool,
                kind = kind.as_str(),
                "tool request rejected"
            ),
            InvocationOutcome::Abandoned => debug!(
                request_id = %record.request_id,
                tool = %record.tool,
                chunks = record.chunks,
                elapsed_ms,
                "stream consumer disconnected"
            ),
        }
    }
}

/// Observer used during testing to capture records.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    records: Mutex<Vec<InvocationRecord>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Takes the records collected so far.
    #[must_use]
    pub fn drain(&self) -> Vec<InvocationRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.drain(..).collect()
    }
}

impl InvocationObserver for CollectingObserver {
    fn on_invocation(&self, record: &InvocationRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
