// HTTP API Tests
// Drive the router end to end over the local backend

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use relaycast_server::api::{build_router, AppState};
use relaycast_server::models::{AppConfig, Platform};
use relaycast_server::services::Backends;

const FLOW_ARN: &str = "arn:relaycast:local:flow:ingest";

struct TestServer {
    router: Router,
    _dir: TempDir,
}

async fn server_with(customize: impl FnOnce(&mut AppConfig)) -> TestServer {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig {
        data_dir: dir.path().to_string_lossy().to_string(),
        flow_arn: FLOW_ARN.to_string(),
        simulator_latency_ms: 0,
        ..AppConfig::default()
    };
    config.channels.insert(Platform::Youtube, "1001".to_string());
    config.channels.insert(Platform::Twitch, "1002".to_string());
    customize(&mut config);

    let backends = Backends::from_config(&config).await.unwrap();
    let state = AppState::new(&config, backends).unwrap();
    TestServer {
        router: build_router(state),
        _dir: dir,
    }
}

async fn server() -> TestServer {
    server_with(|_| {}).await
}

async fn call(server: &TestServer, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    call_with_token(server, method, uri, body, None).await
}

async fn call_with_token(
    server: &TestServer,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = server.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_youtube(server: &TestServer, name: &str) -> String {
    let (status, body) = call(
        server,
        Method::POST,
        "/api/destinations",
        Some(json!({ "name": name, "platform": "youtube", "stream_key": "live-key-1234" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["destination"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_reports_backend_and_topology() {
    let server = server().await;
    let (status, body) = call(&server, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["backend"], "local");
    assert_eq!(body["registry"], "json-file");
    assert_eq!(body["topology"], "shared");
}

#[tokio::test]
async fn test_created_destination_never_echoes_the_stream_key() {
    let server = server().await;
    let id = create_youtube(&server, "Main").await;

    let (status, body) = call(&server, Method::GET, "/api/destinations", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.to_string();
    assert!(!text.contains("live-key-1234"));
    assert_eq!(body["destinations"][0]["id"], id.as_str());
    assert_eq!(body["destinations"][0]["stream_key"], "********");
    assert_eq!(body["destinations"][0]["status"], "ready");
}

#[tokio::test]
async fn test_start_and_stop_drive_the_shared_channel() {
    let server = server().await;
    let id = create_youtube(&server, "Main").await;

    let (status, body) = call(&server, Method::POST, &format!("/api/destinations/{id}/start"), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["destination"]["status"], "streaming");
    assert_eq!(body["channel_id"], "1001");
    assert_eq!(body["channel_action"], "started");

    let (_, status_body) = call(&server, Method::GET, "/api/streaming/status", None).await;
    assert_eq!(status_body["streaming"], json!([id.as_str()]));

    let (status, body) = call(&server, Method::POST, &format!("/api/destinations/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["destination"]["status"], "ready");
    assert_eq!(body["channel_action"], "stopped");
}

#[tokio::test]
async fn test_starting_a_streaming_destination_is_invalid_state() {
    let server = server().await;
    let id = create_youtube(&server, "Main").await;
    call(&server, Method::POST, &format!("/api/destinations/{id}/start"), None).await;

    let (status, body) = call(&server, Method::POST, &format!("/api/destinations/{id}/start"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "InvalidState");
}

#[tokio::test]
async fn test_unknown_destination_is_a_404_envelope() {
    let server = server().await;
    let (status, body) = call(&server, Method::POST, "/api/destinations/missing/start", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_validation_failures_are_400() {
    let server = server().await;

    let (status, body) = call(
        &server,
        Method::POST,
        "/api/destinations",
        Some(json!({ "name": "", "platform": "youtube", "stream_key": "k" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationFailure");

    let (status, body) = call(&server, Method::POST, "/api/destinations", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationFailure");
}

#[tokio::test]
async fn test_token_is_required_when_configured() {
    let server = server_with(|config| config.api_token = "s3cret".to_string()).await;

    let (status, body) = call(&server, Method::GET, "/api/destinations", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, _) = call_with_token(&server, Method::GET, "/api/destinations", None, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call_with_token(&server, Method::GET, "/api/destinations", None, Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&server, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_returns_429_envelope() {
    let server = server_with(|config| config.rate_limit_per_minute = 1).await;

    let (status, _) = call(&server, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&server, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_channel_and_flow_reports() {
    let server = server().await;
    create_youtube(&server, "Main").await;

    let (status, body) = call(&server, Method::GET, "/api/channels/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statuses"]["youtube"]["state"], "IDLE");

    let (status, body) = call(&server, Method::GET, "/api/mediaconnect/inputs/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"]["connected_sources"], 1);
    assert_eq!(body["health"]["total_sources"], 2);

    let (status, body) = call(
        &server,
        Method::PUT,
        "/api/mediaconnect/failover",
        Some(json!({ "state": "ENABLED", "failover_mode": "FAILOVER", "primary_source": "primary" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["failover"]["state"], "ENABLED");
}

#[tokio::test]
async fn test_presets_and_platforms_are_listed() {
    let server = server().await;

    let (status, body) = call(&server, Method::GET, "/api/presets?platform=youtube", None).await;
    assert_eq!(status, StatusCode::OK);
    let presets = body["presets"].as_array().unwrap();
    assert!(!presets.is_empty());
    assert!(presets.iter().all(|preset| preset["platform"] == "youtube"));

    let (status, body) = call(&server, Method::GET, "/api/admin/platforms", None).await;
    assert_eq!(status, StatusCode::OK);
    let youtube = body["platforms"]
        .as_array()
        .unwrap()
        .iter()
        .find(|platform| platform["platform"] == "youtube")
        .unwrap();
    assert_eq!(youtube["channelId"], "1001");
}

#[tokio::test]
async fn test_delete_releases_the_destination() {
    let server = server().await;
    let id = create_youtube(&server, "Main").await;

    let (status, _) = call(&server, Method::DELETE, &format!("/api/destinations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&server, Method::GET, &format!("/api/destinations/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
