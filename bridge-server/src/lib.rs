//! HTTP transport for the tool server.
//!
//! [`ServerBuilder`] loads the tools directory, freezes the catalog, resolves
//! the bearer secret and wires a [`BridgeKernel`] behind an axum router.
//! [`BridgeServer`] owns the bound listener and drives graceful shutdown.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod router;
mod sse;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use bridge_config::ServerConfig;
use bridge_kernel::{
    AuthGate, BridgeKernel, DispatchConfig, InvocationObserver, KernelConfig, LifecycleEvent,
    SchedulerConfig,
};
use bridge_tools::loader::{LoadDiagnostic, ToolLoader};
use bridge_tools::{ArgumentPolicy, CatalogBuilder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use error::{ApiError, ServerError, ServerResult};
pub use router::{AppState, REQUEST_ID_HEADER, build_router};
pub use sse::{encode_frame, frame_stream, sse_response};

/// Assembles a server from configuration.
pub struct ServerBuilder {
    config: ServerConfig,
    auth: Option<AuthGate>,
    observer: Option<Arc<dyn InvocationObserver>>,
    natives: CatalogBuilder,
}

impl ServerBuilder {
    /// Starts from a validated configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            auth: None,
            observer: None,
            natives: CatalogBuilder::new(),
        }
    }

    /// Overrides the auth gate. By default the secret is read once from the
    /// configured environment variable.
    #[must_use]
    pub fn auth(mut self, auth: AuthGate) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Replaces the invocation observer.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Tools registered in code. They are registered before the directory is
    /// loaded, so a loaded tool with the same name is rejected.
    #[must_use]
    pub fn native_tools(mut self, natives: CatalogBuilder) -> Self {
        self.natives = natives;
        self
    }

    /// Loads tools and builds the kernel and router without binding.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Load`] when the tools directory cannot be
    /// scanned and [`ServerError::Manifest`] for an invalid server identity.
    /// Individual broken modules are reported through
    /// [`PreparedServer::diagnostics`] instead.
    pub fn prepare(self) -> ServerResult<PreparedServer> {
        let Self {
            config,
            auth,
            observer,
            mut natives,
        } = self;

        let report = ToolLoader::new(config.tools_directory()).load()?;
        let modules = report.modules_scanned();
        let diagnostics = natives.absorb(report);
        let catalog = natives.build();
        if catalog.is_empty() {
            warn!(
                directory = %config.tools_directory().display(),
                "no tools loaded; the server will only answer discovery and health"
            );
        }
        info!(
            tools = catalog.len(),
            modules,
            skipped = diagnostics.len(),
            "tool catalog ready"
        );

        let manifest = config.manifest(env!("CARGO_PKG_VERSION"))?;
        let auth = auth.unwrap_or_else(|| AuthGate::from_env(config.auth_token_env()));
        let policy = if config.strict_arguments() {
            ArgumentPolicy::Strict
        } else {
            ArgumentPolicy::Lenient
        };
        let kernel_config = KernelConfig::default()
            .with_dispatch(
                DispatchConfig::default()
                    .with_invocation_timeout(config.invocation_timeout())
                    .with_argument_policy(policy),
            )
            .with_scheduler(SchedulerConfig::new(config.max_concurrency()))
            .with_discovery_requires_auth(config.discovery_requires_auth());

        let mut kernel = BridgeKernel::new(manifest, Arc::new(catalog), auth, kernel_config);
        if let Some(observer) = observer {
            kernel = kernel.with_observer(observer);
        }
        let kernel = Arc::new(kernel);
        let router = build_router(Arc::clone(&kernel), config.allowed_origins().clone());

        Ok(PreparedServer {
            kernel,
            router,
            diagnostics,
            config,
        })
    }

    /// Prepares and binds in one step.
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare) and [`PreparedServer::bind`].
    pub async fn bind(self) -> ServerResult<BridgeServer> {
        self.prepare()?.bind().await
    }
}

/// A server with its catalog loaded but no listener yet.
pub struct PreparedServer {
    kernel: Arc<BridgeKernel>,
    router: Router,
    diagnostics: Vec<LoadDiagnostic>,
    config: ServerConfig,
}

impl PreparedServer {
    /// The request-handling core.
    #[must_use]
    pub fn kernel(&self) -> &Arc<BridgeKernel> {
        &self.kernel
    }

    /// A clone of the router, usable with `tower::ServiceExt::oneshot`.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Modules and tools skipped during loading.
    #[must_use]
    pub fn diagnostics(&self) -> &[LoadDiagnostic] {
        &self.diagnostics
    }

    /// Binds the configured host and port.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the address is unavailable.
    pub async fn bind(self) -> ServerResult<BridgeServer> {
        let addr = self.config.display_address();
        let listener = TcpListener::bind((self.config.host(), self.config.port()))
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        info!(%local_addr, "listening");

        Ok(BridgeServer {
            listener,
            local_addr,
            kernel: self.kernel,
            router: self.router,
            config: self.config,
        })
    }
}

/// A bound server, ready to accept connections.
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    kernel: Arc<BridgeKernel>,
    router: Router,
    config: ServerConfig,
}

impl BridgeServer {
    /// Address actually bound; differs from the configuration when port 0 was
    /// requested.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The request-handling core.
    #[must_use]
    pub fn kernel(&self) -> &Arc<BridgeKernel> {
        &self.kernel
    }

    /// Serves until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// See [`serve_with_shutdown`](Self::serve_with_shutdown).
    pub async fn run(self) -> ServerResult<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serves until `signal` resolves, then drains.
    ///
    /// New invocations are refused with `unavailable` as soon as the signal
    /// fires. Invocations still running after the configured grace period are
    /// cancelled. The kernel ends in
    /// [`ServerState::Stopped`](bridge_kernel::ServerState::Stopped).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] when the accept loop fails.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            local_addr,
            kernel,
            router,
            config,
        } = self;

        kernel.transition(LifecycleEvent::Serve)?;
        info!(%local_addr, server = kernel.manifest().name(), "serving tools");

        let draining = CancellationToken::new();
        let trigger = {
            let kernel = Arc::clone(&kernel);
            let draining = draining.clone();
            async move {
                signal.await;
                info!("shutdown requested");
                kernel.begin_shutdown();
                draining.cancel();
            }
        };
        let watchdog = {
            let kernel = Arc::clone(&kernel);
            let draining = draining.clone();
            let grace = config.shutdown_grace();
            tokio::spawn(async move {
                draining.cancelled().await;
                tokio::time::sleep(grace).await;
                kernel.cancel_in_flight();
            })
        };

        let served = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(trigger)
            .await
            .map_err(ServerError::Serve);

        watchdog.abort();
        kernel.finish_shutdown();
        info!("server stopped");
        served
    }
}

/// Assembles, binds and serves with OS signal handling.
///
/// # Errors
///
/// Any [`ServerError`]; callers should exit non-zero.
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    ServerBuilder::new(config).bind().await?.run().await
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
