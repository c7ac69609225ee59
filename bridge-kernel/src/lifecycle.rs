//! Server lifecycle state machine.

use thiserror::Error;
use tracing::debug;

/// States a server occupies between startup and exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Configuration accepted, tools not yet loaded.
    Init,
    /// Catalog built; not yet accepting connections.
    Loaded,
    /// Listening and dispatching requests.
    Serving,
    /// Shutdown requested; in-flight invocations are finishing.
    Draining,
    /// Fully stopped; no further work is accepted.
    Stopped,
}

impl ServerState {
    /// Returns `true` while new invocations may be admitted.
    #[must_use]
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Loaded | Self::Serving)
    }

    /// Returns `true` once the server has stopped.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Events that trigger lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Tool catalog finished loading.
    Load,
    /// Listener bound and serving.
    Serve,
    /// Graceful shutdown started.
    Drain,
    /// In-flight work finished or was cancelled.
    Stop,
    /// Immediate termination from any state.
    Abort,
}

/// Lifecycle state manager.
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    state: ServerState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Starts in [`ServerState::Init`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ServerState::Init,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Applies a lifecycle event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: LifecycleEvent) -> LifecycleResult<ServerState> {
        let next = match (self.state, event) {
            (ServerState::Init, LifecycleEvent::Load) => Some(ServerState::Loaded),
            (ServerState::Loaded, LifecycleEvent::Serve) => Some(ServerState::Serving),
            (ServerState::Loaded | ServerState::Serving | ServerState::Draining, LifecycleEvent::Drain) => {
                Some(ServerState::Draining)
            }
            (ServerState::Draining | ServerState::Stopped, LifecycleEvent::Stop)
            | (_, LifecycleEvent::Abort) => Some(ServerState::Stopped),
            _ => None,
        };

        let Some(next_state) = next else {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                event,
            });
        };

        if next_state != self.state {
            debug!(?self.state, ?next_state, ?event, "server lifecycle transition");
            self.state = next_state;
        }

        Ok(self.state)
    }
}

/// Errors emitted by the lifecycle controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid lifecycle transition from {from:?} via {event:?}")]
    InvalidTransition {
        /// State prior to the attempted transition.
        from: ServerState,
        /// Event that triggered the failure.
        event: LifecycleEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
