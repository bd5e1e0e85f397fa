//! Server Startup Tests
//!
//! Tests for server boot, configuration loading and the HTTP surface.

mod common;

use std::fs;

use axum::{body::Body, http::Request, http::StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use serial_test::serial;
use tempfile::TempDir;
use tower::util::ServiceExt;

use common::{find_available_port, relay_config, spawn_relay};
use waav_relay::{ServerConfig, routes, state::AppState};

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// The server boots without an upstream key; sessions fail only when used
#[tokio::test]
async fn test_minimal_config_boot() {
    let mut config = ServerConfig::default();
    config.port = find_available_port();
    let app = routes::create_app(AppState::new(config).await);

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "OK");
}

#[tokio::test]
async fn test_stats_endpoint_reports_limits() {
    let mut config = ServerConfig::default();
    config.max_websocket_connections = Some(25);
    config.max_connections_per_ip = 4;
    let app = routes::create_app(AppState::new(config).await);

    let request = Request::builder().uri("/stats").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["active_sessions"], 0);
    assert_eq!(body["max_sessions"], 25);
    assert_eq!(body["max_sessions_per_ip"], 4);
}

#[tokio::test]
async fn test_custom_relay_path() {
    let mut config = relay_config("ws://127.0.0.1:1/v1/realtime");
    config.relay_path = "/v1/voice".to_string();
    let (addr, _state) = spawn_relay(config).await;

    let ok = tokio_tungstenite::connect_async(format!("ws://{addr}/v1/voice")).await;
    assert!(ok.is_ok());

    let missing = tokio_tungstenite::connect_async(format!("ws://{addr}/relay")).await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_global_limit_rejects_upgrade() {
    let mut config = relay_config("ws://127.0.0.1:1/v1/realtime");
    config.max_websocket_connections = Some(1);
    let (addr, state) = spawn_relay(config).await;

    let _first = tokio_tungstenite::connect_async(format!("ws://{addr}/relay"))
        .await
        .unwrap();
    assert!(common::eventually(|| state.ws_connection_count() == 1).await);

    match tokio_tungstenite::connect_async(format!("ws://{addr}/relay")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
        other => panic!("expected HTTP 503, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn test_config_file_boot() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("relay.yaml");
    fs::write(
        &config_path,
        r#"
server:
  host: "127.0.0.1"
  port: 0
relay:
  path: "/rt"
  queue_limit: 32
upstream:
  url: "ws://127.0.0.1:9/v1/realtime"
  openai_api_key: "sk-file"
"#,
    )
    .unwrap();

    let config = ServerConfig::from_file(&config_path).unwrap();
    assert_eq!(config.relay_path, "/rt");
    assert_eq!(config.queue_limit, 32);

    let state = AppState::new(config).await;
    assert_eq!(state.realtime_config().api_key, "sk-file");
    assert!(state.realtime_config().url.starts_with("ws://127.0.0.1:9"));
}
