use super::*;
use crate::engine::test_helpers::*;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;


/// Router over `engine` with the engine's own configuration
fn router(engine: &UpdateEngine) -> Router {
    create_router(engine.clone(), engine.get_config())
}

/// Send a request without a body and decode the JSON response, if any
async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    into_parts(app.clone().oneshot(request).await.unwrap()).await
}

/// Send a JSON body and decode the JSON response, if any
async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    into_parts(app.clone().oneshot(request).await.unwrap()).await
}

async fn into_parts(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    // Extractor rejections come back as plain text
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

#[tokio::test]
async fn test_api_server_spawns() {
    let server = MockServer::start().await;
    let (engine, _temp_dir) = create_test_engine(&server).await;

    // Port 0 = OS assigns a free port
    let mut config = (*engine.get_config()).clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let engine = engine.clone();
        let config = config.clone();
        async move { start_api_server(engine, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server stopped early");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let server = MockServer::start().await;
    let (engine, _temp_dir) = create_test_engine(&server).await;

    let mut config = (*engine.get_config()).clone();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(engine, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header missing"
    );
}

#[tokio::test]
async fn test_cors_restricted_to_listed_origins() {
    let server = MockServer::start().await;
    let (engine, _temp_dir) = create_test_engine(&server).await;

    let mut config = (*engine.get_config()).clone();
    config.api.cors_origins = vec!["http://updates.local".to_string()];
    let app = create_router(engine, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://elsewhere.local")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let server = MockServer::start().await;
    let (engine, _temp_dir) = create_test_engine(&server).await;

    let mut config = (*engine.get_config()).clone();
    config.api.cors_enabled = false;
    let app = create_router(engine, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}
