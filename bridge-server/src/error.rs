//! Startup failures and HTTP error responses.

use std::io;

use axum::Json;
use axum::response::{IntoResponse, Response};
use bridge_config::ConfigError;
use bridge_kernel::{DispatchError, ErrorBody, ErrorKind, ErrorResponse, LifecycleError};
use bridge_tools::loader::LoadError;
use http::{HeaderValue, StatusCode, header};
use thiserror::Error;

/// Result alias for server startup and shutdown.
pub type ServerResult<T> = Result<T, ServerError>;

/// Fatal server failures. Every variant ends the process with a non-zero
/// status.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Tools directory could not be scanned.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Server identity is invalid.
    #[error("invalid server manifest: {0}")]
    Manifest(#[from] bridge_primitives::Error),

    /// Lifecycle was driven out of order.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Accept loop failed.
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Error returned from a handler as `{"error": {"kind", "message"}}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// Request body could not be decoded.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind: ErrorKind::ValidationError,
                message: message.into(),
            },
        }
    }

    /// Browser origin is not on the allow-list.
    #[must_use]
    pub fn forbidden_origin() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: ErrorBody {
                kind: ErrorKind::AuthError,
                message: "origin not allowed".to_owned(),
            },
        }
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Body of the response.
    #[must_use]
    pub const fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let status = match err.kind() {
            ErrorKind::AuthError => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ExecutionError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            body: err.body(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(ErrorResponse::from(self.body))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
