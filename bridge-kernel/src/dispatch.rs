//! Request dispatch: lookup, argument validation, and bounded execution.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bridge_primitives::RequestId;
use bridge_tools::{
    ArgumentPolicy, Chunk, ChunkSink, Tool, ToolCatalog, ToolError, ValidationError, ValueType,
};
use futures::{FutureExt, Stream};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::observer::{InvocationObserver, InvocationOutcome, InvocationRecord, TracingObserver};
use crate::scheduler::{ScheduledTask, SchedulerError, SchedulerResult, TaskScheduler};
use crate::wire::{ErrorBody, ErrorKind, StreamFrame};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_STREAM_BUFFER: NonZeroUsize = NonZeroUsize::new(32).unwrap();

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    invocation_timeout: Option<Duration>,
    argument_policy: ArgumentPolicy,
    stream_buffer: NonZeroUsize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: Some(DEFAULT_TIMEOUT),
            argument_policy: ArgumentPolicy::Strict,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl DispatchConfig {
    /// Sets the timeout applied to tools without their own; `None` disables it.
    #[must_use]
    pub const fn with_invocation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Sets how undeclared arguments are treated.
    #[must_use]
    pub const fn with_argument_policy(mut self, policy: ArgumentPolicy) -> Self {
        self.argument_policy = policy;
        self
    }

    /// Sets how many chunks may be buffered per stream before the tool waits.
    #[must_use]
    pub const fn with_stream_buffer(mut self, capacity: NonZeroUsize) -> Self {
        self.stream_buffer = capacity;
        self
    }

    /// Default per-invocation timeout.
    #[must_use]
    pub const fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout
    }

    /// Policy for undeclared arguments.
    #[must_use]
    pub const fn argument_policy(&self) -> ArgumentPolicy {
        self.argument_policy
    }

    /// Per-stream chunk buffer.
    #[must_use]
    pub const fn stream_buffer(&self) -> NonZeroUsize {
        self.stream_buffer
    }
}

/// One call as received from a client.
#[derive(Clone)]
pub struct InboundRequest {
    request_id: RequestId,
    tool_name: String,
    arguments: Value,
    credential: Option<String>,
}

impl fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("request_id", &self.request_id)
            .field("tool_name", &self.tool_name)
            .field("arguments", &self.arguments)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl InboundRequest {
    /// Creates a request with a fresh id and no credential.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            request_id: RequestId::random(),
            tool_name: tool_name.into(),
            arguments,
            credential: None,
        }
    }

    /// Attaches the presented bearer token.
    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Overrides the generated request id.
    #[must_use]
    pub const fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Correlation id.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Requested tool.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Raw argument payload.
    #[must_use]
    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Presented bearer token, if any.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}

/// Per-request failure, safe to show to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Credential missing or invalid.
    #[error("unauthorized")]
    Unauthorized,

    /// No tool with the requested name.
    #[error("tool `{tool}` not found")]
    NotFound {
        /// Requested name.
        tool: String,
    },

    /// Arguments do not match the tool's parameters.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Tool failed, panicked, timed out, or was cancelled.
    #[error("{message}")]
    Execution {
        /// Tool that failed.
        tool: String,
        /// Client-facing message; never carries panic or process detail.
        message: String,
    },

    /// Server is draining and admits no new work.
    #[error("server is shutting down")]
    Unavailable,
}

impl DispatchError {
    /// Wire category of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::AuthError,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Execution { .. } => ErrorKind::ExecutionError,
            Self::Unavailable => ErrorKind::Unavailable,
        }
    }

    /// Error body sent to the client.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    fn opaque(tool: &str) -> Self {
        Self::Execution {
            tool: tool.to_owned(),
            message: format!("tool `{tool}` failed"),
        }
    }

    fn cancelled(tool: &str) -> Self {
        Self::Execution {
            tool: tool.to_owned(),
            message: format!("invocation of `{tool}` was cancelled"),
        }
    }

    fn from_tool_error(tool: String, err: ToolError) -> Self {
        match err {
            ToolError::Execution { reason } => Self::Execution {
                tool,
                message: reason,
            },
            ToolError::Cancelled => Self::cancelled(&tool),
            other => {
                warn!(tool = %tool, error = %other, "tool failed");
                Self::opaque(&tool)
            }
        }
    }
}

/// Resolved, validated call ready to run.
struct Invocation {
    tool: Arc<dyn Tool>,
    name: String,
    returns: ValueType,
    timeout: Option<Duration>,
    arguments: Value,
}

impl Invocation {
    async fn run(self, sink: ChunkSink) -> DispatchResult<Value> {
        let Self {
            tool,
            name,
            returns,
            timeout,
            arguments,
        } = self;

        let call = AssertUnwindSafe(tool.invoke(arguments, sink)).catch_unwind();
        let outcome = match timeout {
            Some(limit) => {
                if let Ok(outcome) = tokio::time::timeout(limit, call).await {
                    outcome
                } else {
                    warn!(tool = %name, timeout = ?limit, "tool invocation timed out");
                    return Err(DispatchError::Execution {
                        message: format!("tool `{name}` timed out after {limit:?}"),
                        tool: name,
                    });
                }
            }
            None => call.await,
        };

        match outcome {
            Err(panic) => {
                error!(tool = %name, panic = panic_message(panic.as_ref()), "tool panicked");
                Err(DispatchError::opaque(&name))
            }
            Ok(Err(err)) => Err(DispatchError::from_tool_error(name, err)),
            Ok(Ok(value)) if returns.matches(&value) => Ok(value),
            Ok(Ok(value)) => {
                warn!(
                    tool = %name,
                    expected = %returns,
                    found = %ValueType::of(&value),
                    "tool returned a value of the wrong type"
                );
                Err(DispatchError::Execution {
                    message: format!("tool `{name}` returned an invalid result"),
                    tool: name,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn settle(tool: &str, joined: SchedulerResult<DispatchResult<Value>>) -> DispatchResult<Value> {
    match joined {
        Ok(result) => result,
        Err(SchedulerError::Closed) => Err(DispatchError::Unavailable),
        Err(SchedulerError::Cancelled) => Err(DispatchError::cancelled(tool)),
        Err(SchedulerError::Panicked) => Err(DispatchError::opaque(tool)),
    }
}

fn outcome_of<T>(result: &DispatchResult<T>) -> InvocationOutcome {
    match result {
        Ok(_) => InvocationOutcome::Completed,
        Err(err) => InvocationOutcome::Failed(err.kind()),
    }
}

/// Resolves, validates, and runs tool invocations.
///
/// Stateless between calls. Every invocation runs as its own scheduled task,
/// so a panic or timeout in one tool never affects another request.
#[derive(Clone)]
pub struct Dispatcher {
    catalog: Arc<ToolCatalog>,
    scheduler: TaskScheduler,
    config: DispatchConfig,
    observer: Arc<dyn InvocationObserver>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.catalog.len())
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher logging outcomes through [`TracingObserver`].
    #[must_use]
    pub fn new(catalog: Arc<ToolCatalog>, scheduler: TaskScheduler, config: DispatchConfig) -> Self {
        Self {
            catalog,
            scheduler,
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replaces the invocation observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Catalog served by this dispatcher.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Scheduler running invocations.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> DispatchConfig {
        self.config
    }

    fn prepare(&self, tool_name: &str, arguments: Value) -> DispatchResult<Invocation> {
        let descriptor = self
            .catalog
            .get(tool_name)
            .ok_or_else(|| DispatchError::NotFound {
                tool: tool_name.to_owned(),
            })?;
        let arguments = descriptor
            .parameters()
            .validate(arguments, self.config.argument_policy)?;

        Ok(Invocation {
            tool: Arc::clone(descriptor.tool()),
            name: descriptor.name().to_string(),
            returns: descriptor.returns(),
            timeout: descriptor.timeout().or(self.config.invocation_timeout),
            arguments: Value::Object(arguments),
        })
    }

    fn spawn(
        &self,
        invocation: Invocation,
        sink: ChunkSink,
    ) -> DispatchResult<ScheduledTask<DispatchResult<Value>>> {
        self.scheduler
            .spawn(invocation.run(sink))
            .map_err(|_| DispatchError::Unavailable)
    }

    /// Runs a tool to completion and returns its final value.
    ///
    /// Chunks emitted by streaming tools are discarded. Dropping the returned
    /// future aborts the invocation.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`], [`DispatchError::Validation`], or
    /// [`DispatchError::Unavailable`] before anything runs, and
    /// [`DispatchError::Execution`] when the tool fails.
    pub async fn dispatch(&self, request: InboundRequest) -> DispatchResult<Value> {
        let started = Instant::now();
        let InboundRequest {
            request_id,
            tool_name,
            arguments,
            ..
        } = request;

        let result = match self.prepare(&tool_name, arguments) {
            Ok(invocation) => {
                let name = invocation.name.clone();
                match self.spawn(invocation, ChunkSink::discard()) {
                    Ok(task) => settle(&name, task.await),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        self.observer.on_invocation(&InvocationRecord {
            request_id,
            tool: tool_name,
            streaming: false,
            outcome: outcome_of(&result),
            chunks: 0,
            elapsed: started.elapsed(),
        });
        result
    }

    /// Starts a tool and returns its frames as a stream.
    ///
    /// The tool starts immediately. Dropping the stream aborts it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`], [`DispatchError::Validation`], or
    /// [`DispatchError::Unavailable`]; execution failures arrive as the
    /// terminal `error` frame instead.
    pub fn dispatch_stream(&self, request: InboundRequest) -> DispatchResult<InvocationStream> {
        let started = Instant::now();
        let InboundRequest {
            request_id,
            tool_name,
            arguments,
            ..
        } = request;

        let started_task = self.prepare(&tool_name, arguments).and_then(|invocation| {
            let (sink, chunks) = ChunkSink::channel(self.config.stream_buffer);
            let name = invocation.name.clone();
            let task = self.spawn(invocation, sink)?;
            Ok((name, task, chunks))
        });

        match started_task {
            Ok((tool, task, chunks)) => Ok(InvocationStream {
                chunks,
                task: Some(task),
                outcome: None,
                finished: false,
                delivered: 0,
                request_id,
                tool,
                started,
                observer: Arc::clone(&self.observer),
            }),
            Err(err) => {
                self.observer.on_invocation(&InvocationRecord {
                    request_id,
                    tool: tool_name,
                    streaming: true,
                    outcome: InvocationOutcome::Failed(err.kind()),
                    chunks: 0,
                    elapsed: started.elapsed(),
                });
                Err(err)
            }
        }
    }
}

/// Frames of one streaming invocation.
///
/// Yields chunk frames in emission order, then exactly one `done` or `error`
/// frame, then ends.
pub struct InvocationStream {
    chunks: mpsc::Receiver<Chunk>,
    task: Option<ScheduledTask<DispatchResult<Value>>>,
    outcome: Option<DispatchResult<Value>>,
    finished: bool,
    delivered: usize,
    request_id: RequestId,
    tool: String,
    started: Instant,
    observer: Arc<dyn InvocationObserver>,
}

impl fmt::Debug for InvocationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationStream")
            .field("request_id", &self.request_id)
            .field("tool", &self.tool)
            .field("delivered", &self.delivered)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl InvocationStream {
    /// Correlation id of the request.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Tool being run.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    fn report(&self, outcome: InvocationOutcome) {
        self.observer.on_invocation(&InvocationRecord {
            request_id: self.request_id,
            tool: self.tool.clone(),
            streaming: true,
            outcome,
            chunks: self.delivered,
            elapsed: self.started.elapsed(),
        });
    }
}

impl Stream for InvocationStream {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.outcome.is_none() {
            if let Some(task) = this.task.as_mut() {
                if let Poll::Ready(joined) = Pin::new(task).poll(cx) {
                    this.outcome = Some(settle(&this.tool, joined));
                    this.task = None;
                }
            }
        }

        // Buffered chunks always precede the terminal frame.
        match this.chunks.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                this.delivered += 1;
                return Poll::Ready(Some(chunk.into()));
            }
            Poll::Pending if this.outcome.is_none() => return Poll::Pending,
            Poll::Ready(None) | Poll::Pending => {}
        }

        let Some(outcome) = this.outcome.take() else {
            return Poll::Pending;
        };
        this.finished = true;
        this.report(outcome_of(&outcome));
        Poll::Ready(Some(match outcome {
            Ok(result) => StreamFrame::Done { result },
            Err(err) => StreamFrame::Error { error: err.body() },
        }))
    }
}

impl Drop for InvocationStream {
    fn drop(&mut self) {
        if !self.finished {
            self.report(InvocationOutcome::Abandoned);
        }
    }
}
