use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use bridge_config::ServerConfig;
use bridge_kernel::AuthGate;
use bridge_server::{PreparedServer, ServerBuilder};
use bridge_tools::loader::LoadFailure;
use bridge_tools::{CatalogBuilder, ParameterSchema, ToolError};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "s3cret";
const APP_ORIGIN: &str = "https://app.example.com";

const WEATHER: &str = r#"
[[tool]]
name = "get_weather"
description = "Get weather information for a location."
returns = "string"

[[tool.parameters]]
name = "location"
type = "string"
description = "City name"

[tool.handler]
kind = "template"
text = "The weather in {location} is sunny, 22°C with light winds."
"#;

struct Harness {
    _dir: TempDir,
    server: PreparedServer,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    fn router(&self) -> Router {
        self.server.router()
    }
}

fn natives(calls: &Arc<AtomicUsize>) -> CatalogBuilder {
    let mut builder = CatalogBuilder::new();
    let counted = Arc::clone(calls);
    builder
        .register_fn("count", "Counts calls", ParameterSchema::empty(), move |_: Value| {
            let calls = Arc::clone(&counted);
            async move { Ok(json!(calls.fetch_add(1, Ordering::SeqCst) + 1)) }
        })
        .unwrap();
    builder
        .register_fn("explode", "Always panics", ParameterSchema::empty(), |input: Value| {
            async move {
                if input.is_object() {
                    panic!("secret internal detail");
                }
                Ok(json!(null))
            }
        })
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
}

fn harness_with(modules: &[(&str, &str)], public_discovery: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in modules {
        fs::write(dir.path().join(name), contents).unwrap();
    }
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ServerConfig::builder(dir.path())
        .cors_origins(APP_ORIGIN)
        .unwrap()
        .discovery_requires_auth(!public_discovery)
        .build()
        .unwrap();
    let server = ServerBuilder::new(config)
        .auth(AuthGate::with_secret(TOKEN))
        .native_tools(natives(&calls))
        .prepare()
        .unwrap();
    Harness {
        _dir: dir,
        server,
        calls,
    }
}

fn harness() -> Harness {
    harness_with(&[("weather.toml", WEATHER)], false)
}

fn post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    request.body(Body::from(body.to_owned())).expect("request")
}

fn invoke(token: Option<&str>, payload: &Value) -> Request<Body> {
    post("/v1/tools/invoke", token, &payload.to_string())
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn get_weather_for_london() {
    let harness = harness();
    let (status, body) = send(
        harness.router(),
        invoke(
            Some(TOKEN),
            &json!({"tool_name": "get_weather", "arguments": {"location": "London"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"result": "The weather in London is sunny, 22°C with light winds."})
    );
}

#[tokio::test]
async fn rejected_credentials_never_run_the_tool() {
    let harness = harness();
    let payload = json!({"tool_name": "count", "arguments": {}});

    for token in [None, Some("wrong"), Some("")] {
        let response = harness
            .router()
            .oneshot(invoke(token, &payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
    let (status, body) = send(
        harness.router(),
        post("/v1/tools/invoke", Some("wrong"), "{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "auth_error");
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);

    let (status, body) = send(harness.router(), invoke(Some(TOKEN), &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], 1);
    assert_eq!(harness.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let harness = harness();
    let (status, body) = send(
        harness.router(),
        invoke(Some(TOKEN), &json!({"tool_name": "nope", "arguments": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn invalid_arguments_are_rejected_before_execution() {
    let harness = harness();
    for arguments in [
        json!({}),
        json!({"location": 7}),
        json!({"location": "London", "units": "metric"}),
    ] {
        let (status, body) = send(
            harness.router(),
            invoke(
                Some(TOKEN),
                &json!({"tool_name": "get_weather", "arguments": arguments}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{arguments}");
        assert_eq!(body["error"]["kind"], "validation_error");
    }
}

#[tokio::test]
async fn undecodable_body_is_a_bad_request() {
    let harness = harness();
    let (status, body) = send(
        harness.router(),
        post("/v1/tools/invoke", Some(TOKEN), r#"{"arguments": {}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn crashing_tool_is_isolated() {
    let harness = harness();
    let (status, body) = send(
        harness.router(),
        invoke(Some(TOKEN), &json!({"tool_name": "explode", "arguments": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["kind"], "execution_error");
    assert!(!body.to_string().contains("secret internal detail"));

    let (status, _) = send(
        harness.router(),
        invoke(
            Some(TOKEN),
            &json!({"tool_name": "get_weather", "arguments": {"location": "Paris"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        harness.router(),
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn stream_delivers_chunks_in_order_then_done() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(post(
            "/v1/tools/stream",
            Some(TOKEN),
            &json!({"tool_name": "spell", "arguments": {}}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let frames: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(
        frames,
        vec![
            json!({"kind": "output_delta", "delta": "A"}),
            json!({"kind": "output_delta", "delta": "B"}),
            json!({"kind": "output_delta", "delta": "C"}),
            json!({"kind": "done", "result": "ABC"}),
        ]
    );
    let events: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(events, ["output_delta", "output_delta", "output_delta", "done"]);
}

#[tokio::test]
async fn stream_of_crashing_tool_ends_with_error_frame() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(post(
            "/v1/tools/stream",
            Some(TOKEN),
            &json!({"tool_name": "explode", "arguments": {}}).to_string(),
        ))
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let last: Value = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .last()
        .map(|data| serde_json::from_str(data).unwrap())
        .unwrap();
    assert_eq!(last["kind"], "error");
    assert_eq!(last["error"]["kind"], "execution_error");
    assert!(!text.contains("secret internal detail"));
}

#[tokio::test]
async fn stream_rejects_bad_credentials_with_json_error() {
    let harness = harness();
    let (status, body) = send(
        harness.router(),
        post(
            "/v1/tools/stream",
            None,
            &json!({"tool_name": "spell", "arguments": {}}).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "auth_error");
}

#[tokio::test]
async fn discovery_requires_auth_by_default() {
    let harness = harness();
    let (status, _) = send(
        harness.router(),
        Request::builder()
            .uri("/v1/tools")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        harness.router(),
        Request::builder()
            .uri("/v1/tools")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server"]["name"], "mcp-tools-server");
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert!(names.contains(&"get_weather"));
    assert!(names.contains(&"spell"));
}

#[tokio::test]
async fn discovery_can_be_public() {
    let harness = harness_with(&[("weather.toml", WEATHER)], true);
    let (status, body) = send(
        harness.router(),
        Request::builder()
            .uri("/v1/tools")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["tools"].is_array());
}

#[tokio::test]
async fn cors_preflight_for_allowed_origin() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/tools/invoke")
                .header(header::ORIGIN, APP_ORIGIN)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        APP_ORIGIN
    );
}

#[tokio::test]
async fn cors_preflight_for_other_origin_gets_no_grant() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/tools/invoke")
                .header(header::ORIGIN, "https://evil.example.net")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn disallowed_origin_is_forbidden_before_dispatch() {
    let harness = harness();
    let mut request = invoke(Some(TOKEN), &json!({"tool_name": "count", "arguments": {}}));
    request.headers_mut().insert(
        header::ORIGIN,
        "https://evil.example.net".parse().unwrap(),
    );
    let (status, body) = send(harness.router(), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "auth_error");
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);

    let mut request = invoke(Some(TOKEN), &json!({"tool_name": "count", "arguments": {}}));
    request
        .headers_mut()
        .insert(header::ORIGIN, APP_ORIGIN.parse().unwrap());
    let response = harness.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        APP_ORIGIN
    );
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let generated = response.headers()["x-request-id"].to_str().unwrap();
    assert!(!generated.is_empty());

    let id = "6f1c4c1e-8a44-4c1f-9a3b-2b2f0a1d7e55";
    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], id);
}

#[test]
fn broken_module_next_to_valid_one_yields_one_diagnostic() {
    let harness = harness_with(
        &[
            ("broken.toml", "[[tool]\nname = "),
            ("weather.toml", WEATHER),
        ],
        false,
    );
    let diagnostics = harness.server.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(
        diagnostics[0].module().file_name(),
        Some(Path::new("broken.toml").as_os_str())
    );
    assert!(matches!(diagnostics[0].failure(), LoadFailure::Parse(_)));
    assert!(harness.server.kernel().catalog().get("get_weather").is_some());
}

#[test]
fn duplicate_tool_name_keeps_one_descriptor() {
    let harness = harness_with(
        &[("a_weather.toml", WEATHER), ("b_weather.toml", WEATHER)],
        false,
    );
    let catalog = harness.server.kernel().catalog();
    assert_eq!(
        catalog.names().filter(|name| *name == "get_weather").count(),
        1
    );
    let diagnostics = harness.server.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].tool(), Some("get_weather"));
    assert!(matches!(
        diagnostics[0].failure(),
        LoadFailure::DuplicateName { .. }
    ));
    assert!(
        catalog
            .get("get_weather")
            .unwrap()
            .source()
            .to_string()
            .contains("a_weather.toml")
    );
}

#[test]
fn loaded_tool_cannot_shadow_a_native_one() {
    let clash = r#"
[[tool]]
name = "count"

[tool.handler]
kind = "template"
text = "shadowed"
"#;
    let harness = harness_with(&[("clash.toml", clash)], false);
    let diagnostics = harness.server.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].tool(), Some("count"));
}
