//! HTTP routes and middleware.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bridge_config::AllowedOrigins;
use bridge_kernel::{
    BridgeKernel, DiscoveryResponse, HealthResponse, InboundRequest, InvokeRequest,
    InvokeResponse, bearer_token,
};
use bridge_primitives::RequestId;
use http::header::{AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::ApiError;
use crate::sse::{frame_stream, sse_response};

/// Correlation header read from requests and set on every response.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    kernel: Arc<BridgeKernel>,
    origins: Arc<AllowedOrigins>,
}

/// Builds the application router.
///
/// Middleware runs outermost first: request id, tracing, CORS, origin guard,
/// then the handler.
pub fn build_router(kernel: Arc<BridgeKernel>, origins: AllowedOrigins) -> Router {
    let state = AppState {
        kernel,
        origins: Arc::new(origins),
    };

    Router::new()
        .route("/health", get(health))
        .route("/v1/tools", get(discover))
        .route("/v1/tools/invoke", post(invoke))
        .route("/v1/tools/stream", post(invoke_stream))
        .layer(middleware::from_fn_with_state(state.clone(), origin_guard))
        .layer(cors_layer(Arc::clone(&state.origins)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

fn cors_layer(origins: Arc<AllowedOrigins>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([REQUEST_ID_HEADER]);
    if origins.is_any() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &http::request::Parts| {
                origin.to_str().is_ok_and(|origin| origins.allows(origin))
            },
        ))
    }
}

async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<RequestId>().ok())
        .unwrap_or_else(RequestId::random);
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn origin_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(origin) = request.headers().get(ORIGIN) {
        let allowed = origin
            .to_str()
            .is_ok_and(|origin| state.origins.allows(origin));
        if !allowed {
            debug!(origin = ?origin, "request from disallowed origin rejected");
            return ApiError::forbidden_origin().into_response();
        }
    }
    next.run(request).await
}

fn credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()
        .and_then(bearer_token)
}

/// Unwraps the decoded body. Unauthenticated callers get 401 even when the
/// body is malformed.
fn decode(
    kernel: &BridgeKernel,
    credential: Option<&str>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<InvokeRequest, ApiError> {
    match payload {
        Ok(Json(payload)) => Ok(payload),
        Err(rejection) => {
            kernel.authorize(credential)?;
            Err(ApiError::bad_request(rejection.body_text()))
        }
    }
}

fn inbound(payload: InvokeRequest, credential: Option<&str>, id: RequestId) -> InboundRequest {
    let request = InboundRequest::new(payload.tool_name, payload.arguments).with_request_id(id);
    match credential {
        Some(token) => request.with_credential(token),
        None => request,
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.kernel.health())
}

async fn discover(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DiscoveryResponse>, ApiError> {
    Ok(Json(state.kernel.discover(credential(&headers))?))
}

async fn invoke(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    headers: HeaderMap,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let credential = credential(&headers);
    let payload = decode(&state.kernel, credential, payload)?;
    let result = state
        .kernel
        .invoke(inbound(payload, credential, id))
        .await?;
    Ok(Json(InvokeResponse { result }))
}

async fn invoke_stream(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    headers: HeaderMap,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let credential = credential(&headers);
    let payload = decode(&state.kernel, credential, payload)?;
    let invocation = state.kernel.invoke_stream(inbound(payload, credential, id))?;
    Ok(sse_response(frame_stream(invocation)))
}
