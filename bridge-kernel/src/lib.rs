//! Request handling core for the tool server.
//!
//! [`BridgeKernel`] wires the auth gate, dispatcher, scheduler, and lifecycle
//! together. Transports hand it an [`InboundRequest`] and get back a value, a
//! frame stream, or a [`DispatchError`] carrying a wire [`ErrorKind`]. The
//! credential is always checked before anything else happens.

#![warn(missing_docs, clippy::pedantic)]

mod auth;
mod dispatch;
mod lifecycle;
mod observer;
mod scheduler;
pub mod wire;

use std::sync::{Arc, Mutex, PoisonError};

use bridge_primitives::ServerManifest;
use bridge_tools::ToolCatalog;
use serde_json::Value;
use tracing::{debug, info, warn};

pub use auth::{AuthDecision, AuthGate, bearer_token};
pub use dispatch::{
    DispatchConfig, DispatchError, DispatchResult, Dispatcher, InboundRequest, InvocationStream,
};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleEvent, LifecycleResult, ServerState};
pub use observer::{
    CollectingObserver, InvocationObserver, InvocationOutcome, InvocationRecord, TracingObserver,
};
pub use scheduler::{
    ScheduledTask, SchedulerConfig, SchedulerError, SchedulerResult, TaskScheduler,
};
pub use wire::{
    DiscoveryResponse, ErrorBody, ErrorKind, ErrorResponse, HealthResponse, InvokeRequest,
    InvokeResponse, StreamFrame,
};

/// Kernel tuning.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    dispatch: DispatchConfig,
    scheduler: SchedulerConfig,
    discovery_requires_auth: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            scheduler: SchedulerConfig::default(),
            discovery_requires_auth: true,
        }
    }
}

impl KernelConfig {
    /// Sets the dispatcher configuration.
    #[must_use]
    pub const fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub const fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Controls whether discovery requires a valid credential.
    #[must_use]
    pub const fn with_discovery_requires_auth(mut self, required: bool) -> Self {
        self.discovery_requires_auth = required;
        self
    }
}

/// Core runtime that wires auth, lifecycle, scheduler, and dispatch.
#[derive(Debug)]
pub struct BridgeKernel {
    manifest: ServerManifest,
    auth: AuthGate,
    dispatcher: Dispatcher,
    lifecycle: Mutex<Lifecycle>,
    discovery_requires_auth: bool,
}

impl BridgeKernel {
    /// Creates a kernel over a frozen catalog. The kernel starts in
    /// [`ServerState::Loaded`].
    #[must_use]
    pub fn new(
        manifest: ServerManifest,
        catalog: Arc<ToolCatalog>,
        auth: AuthGate,
        config: KernelConfig,
    ) -> Self {
        let scheduler = TaskScheduler::new(config.scheduler);
        let mut lifecycle = Lifecycle::new();
        // Init -> Loaded is always valid.
        let _ = lifecycle.transition(LifecycleEvent::Load);

        Self {
            manifest,
            auth,
            dispatcher: Dispatcher::new(catalog, scheduler, config.dispatch),
            lifecycle: Mutex::new(lifecycle),
            discovery_requires_auth: config.discovery_requires_auth,
        }
    }

    /// Replaces the invocation observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.dispatcher = self.dispatcher.with_observer(observer);
        self
    }

    /// Server identity.
    #[must_use]
    pub fn manifest(&self) -> &ServerManifest {
        &self.manifest
    }

    /// Tools served by this kernel.
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        self.dispatcher.catalog()
    }

    /// Returns `true` when discovery demands a credential.
    #[must_use]
    pub const fn discovery_requires_auth(&self) -> bool {
        self.discovery_requires_auth
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    /// Applies a lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the transition is not permitted.
    pub fn transition(&self, event: LifecycleEvent) -> LifecycleResult<ServerState> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transition(event)
    }

    /// Invocations admitted but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.dispatcher.scheduler().in_flight()
    }

    /// Checks a presented bearer token without dispatching anything.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Unauthorized`] when the gate rejects it.
    pub fn authorize(&self, credential: Option<&str>) -> DispatchResult<()> {
        if self.auth.authenticate(credential).is_authorized() {
            Ok(())
        } else {
            debug!(credential_present = credential.is_some(), "request rejected by auth gate");
            Err(DispatchError::Unauthorized)
        }
    }

    fn admit(&self, request: &InboundRequest) -> DispatchResult<()> {
        self.authorize(request.credential())?;
        if self.state().accepts_work() {
            Ok(())
        } else {
            Err(DispatchError::Unavailable)
        }
    }

    /// Authenticates and runs a tool to completion.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Unauthorized`] before the tool is resolved,
    /// [`DispatchError::Unavailable`] while shutting down, and otherwise
    /// whatever [`Dispatcher::dispatch`] returns.
    pub async fn invoke(&self, request: InboundRequest) -> DispatchResult<Value> {
        self.admit(&request)?;
        self.dispatcher.dispatch(request).await
    }

    /// Authenticates and starts a streaming invocation.
    ///
    /// # Errors
    ///
    /// As [`invoke`](Self::invoke), for failures that happen before the tool
    /// starts.
    pub fn invoke_stream(&self, request: InboundRequest) -> DispatchResult<InvocationStream> {
        self.admit(&request)?;
        self.dispatcher.dispatch_stream(request)
    }

    /// Lists the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Unauthorized`] when discovery requires auth and
    /// the credential is rejected.
    pub fn discover(&self, credential: Option<&str>) -> DispatchResult<DiscoveryResponse> {
        if self.discovery_requires_auth {
            self.authorize(credential)?;
        }
        Ok(DiscoveryResponse {
            server: self.manifest.clone(),
            tools: self.catalog().list(),
        })
    }

    /// Liveness snapshot.
    #[must_use]
    pub fn health(&self) -> HealthResponse {
        let status = match self.state() {
            ServerState::Init | ServerState::Loaded | ServerState::Serving => "ok",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        };
        HealthResponse {
            status: status.to_owned(),
            server: self.manifest.name().to_owned(),
            tools: self.catalog().len(),
            in_flight: self.in_flight(),
        }
    }

    /// Stops admitting new invocations; admitted ones keep running.
    pub fn begin_shutdown(&self) {
        // Drain is valid from every non-terminal state past Init.
        if self.transition(LifecycleEvent::Drain).is_ok() {
            info!(in_flight = self.in_flight(), "draining in-flight invocations");
        }
        self.dispatcher.scheduler().close();
    }

    /// Cancels every invocation still running.
    pub fn cancel_in_flight(&self) {
        let remaining = self.in_flight();
        if remaining > 0 {
            info!(remaining, "cancelling invocations after shutdown grace period");
        }
        self.dispatcher.scheduler().cancel_all();
    }

    /// Marks the kernel stopped. A drained kernel stops cleanly; any other
    /// state is aborted.
    pub fn finish_shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let event = if lifecycle.state() == ServerState::Draining {
            LifecycleEvent::Stop
        } else {
            LifecycleEvent::Abort
        };
        if let Err(err) = lifecycle.transition(event) {
            warn!(error = %err, "failed to stop server lifecycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bridge_tools::{ParameterSchema, ParameterSpec, ToolError, ValueType};
    use futures::StreamExt;
    use serde_json::json;

    const TOKEN: &str = "s3cret";

    fn build_kernel(calls: Arc<AtomicUsize>, config: KernelConfig) -> BridgeKernel {
        let mut builder = ToolCatalog::builder();
        builder
            .register_fn(
                "get_weather",
                "Weather report",
                ParameterSchema::new(vec![ParameterSpec::new("location", ValueType::String)])
                    .unwrap(),
                move |input: Value| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let location = input["location"].as_str().unwrap_or_default().to_owned();
                        Ok(json!(format!(
                            "The weather in {location} is sunny, 22°C with light winds."
                        )))
                    }
                },
            )
            .unwrap();
        builder
            .register_streaming("spell", "Spells ABC", ParameterSchema::empty(), |_, sink| {
                async move {
                    for letter in ["A", "B", "C"] {
                        sink.output_delta(letter).await?;
                    }
                    Ok::<_, ToolError>(json!("ABC"))
                }
            })
            .unwrap();
        builder
            .register_fn("slow", "Sleeps", ParameterSchema::empty(), |_: Value| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("rested"))
            })
            .unwrap();

        let manifest = ServerManifest::builder()
            .name("weather-tools")
            .and_then(|builder| builder.version("0.1.0"))
            .and_then(bridge_primitives::ServerManifestBuilder::build)
            .unwrap();
        BridgeKernel::new(
            manifest,
            Arc::new(builder.build()),
            AuthGate::with_secret(TOKEN),
            config,
        )
    }

    fn weather(location: &str) -> InboundRequest {
        InboundRequest::new("get_weather", json!({ "location": location }))
    }

    #[tokio::test]
    async fn authorized_call_runs_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let kernel = build_kernel(Arc::clone(&calls), KernelConfig::default());

        let result = kernel
            .invoke(weather("London").with_credential(TOKEN))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!("The weather in London is sunny, 22°C with light winds.")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_credentials_never_run_the_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let kernel = build_kernel(Arc::clone(&calls), KernelConfig::default());

        for request in [weather("London"), weather("London").with_credential("wrong")] {
            let err = kernel.invoke(request).await.unwrap_err();
            assert_eq!(err, DispatchError::Unauthorized);
            assert_eq!(err.body().message, "unauthorized");
        }
        assert!(
            kernel
                .invoke_stream(InboundRequest::new("spell", json!({})).with_credential("nope"))
                .is_err()
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auth_is_checked_before_lookup() {
        let kernel = build_kernel(Arc::new(AtomicUsize::new(0)), KernelConfig::default());
        let err = kernel
            .invoke(InboundRequest::new("missing", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthError);
        assert!(!err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn streams_through_the_kernel() {
        let kernel = build_kernel(Arc::new(AtomicUsize::new(0)), KernelConfig::default());
        let frames: Vec<_> = kernel
            .invoke_stream(InboundRequest::new("spell", json!({})).with_credential(TOKEN))
            .unwrap()
            .map(|frame| frame.kind())
            .collect()
            .await;
        assert_eq!(frames, ["output_delta", "output_delta", "output_delta", "done"]);
    }

    #[test]
    fn discovery_honours_auth_setting() {
        let kernel = build_kernel(Arc::new(AtomicUsize::new(0)), KernelConfig::default());
        assert_eq!(kernel.discover(None).unwrap_err(), DispatchError::Unauthorized);

        let listing = kernel.discover(Some(TOKEN)).unwrap();
        assert_eq!(listing.server.name(), "weather-tools");
        let names: Vec<_> = listing.tools.iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, ["get_weather", "spell", "slow"]);
        assert!(listing.tools[1].streaming);

        let public = build_kernel(
            Arc::new(AtomicUsize::new(0)),
            KernelConfig::default().with_discovery_requires_auth(false),
        );
        assert_eq!(public.discover(None).unwrap().tools.len(), 3);
    }

    #[tokio::test]
    async fn draining_rejects_new_work_but_finishes_admitted() {
        let kernel = Arc::new(build_kernel(Arc::new(AtomicUsize::new(0)), KernelConfig::default()));
        kernel.transition(LifecycleEvent::Serve).unwrap();

        let pending = {
            let kernel = Arc::clone(&kernel);
            tokio::spawn(async move {
                kernel
                    .invoke(InboundRequest::new("slow", json!({})).with_credential(TOKEN))
                    .await
            })
        };
        while kernel.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        kernel.begin_shutdown();
        assert_eq!(kernel.state(), ServerState::Draining);
        assert_eq!(kernel.health().status, "draining");

        let err = kernel
            .invoke(weather("Paris").with_credential(TOKEN))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        assert_eq!(pending.await.unwrap().unwrap(), json!("rested"));
        kernel.finish_shutdown();
        assert_eq!(kernel.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn cancel_in_flight_reports_cancellation() {
        let kernel = Arc::new(build_kernel(Arc::new(AtomicUsize::new(0)), KernelConfig::default()));
        let pending = {
            let kernel = Arc::clone(&kernel);
            tokio::spawn(async move {
                kernel
                    .invoke(InboundRequest::new("slow", json!({})).with_credential(TOKEN))
                    .await
            })
        };
        while kernel.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        kernel.begin_shutdown();
        kernel.cancel_in_flight();
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "invocation of `slow` was cancelled");
    }

    #[test]
    fn finish_shutdown_without_drain_aborts() {
        let kernel = build_kernel(Arc::new(AtomicUsize::new(0)), KernelConfig::default());
        assert_eq!(kernel.state(), ServerState::Loaded);
        kernel.finish_shutdown();
        assert_eq!(kernel.state(), ServerState::Stopped);
        kernel.finish_shutdown();
        assert_eq!(kernel.state(), ServerState::Stopped);
    }

    #[test]
    fn health_reports_catalog_size() {
        let kernel = build_kernel(Arc::new(AtomicUsize::new(0)), KernelConfig::default());
        let health = kernel.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.server, "weather-tools");
        assert_eq!(health.tools, 3);
        assert_eq!(health.in_flight, 0);
    }
}
