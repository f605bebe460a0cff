//! Health Check API Tests

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::TestApp;

#[tokio::test]
async fn test_health_check_returns_ok() {
    let app = TestApp::spawn().await;
    let response = app.get("/health").await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], json!("healthy"));
    assert!(body.get("version").is_some());
}

#[tokio::test]
async fn test_liveness_probe() {
    let app = TestApp::spawn().await;
    let response = app.get("/health/live").await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], json!("alive"));
}

#[tokio::test]
async fn test_readiness_reports_sessions() {
    let app = TestApp::spawn().await;
    let (_conn, _) = app.identify(1).await;

    let response = app.get("/health/ready").await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["checks"]["gateway"]["active_sessions"], json!(1));
    assert_eq!(body["checks"]["gateway"]["draining"], json!(false));
    assert_eq!(body["checks"]["ready_state"]["source"], json!("memory"));
}

#[tokio::test]
async fn test_readiness_fails_while_draining() {
    let app = TestApp::spawn().await;
    app.gateway.request_reconnect_all();

    let response = app.get("/health/ready").await;
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["checks"]["gateway"]["draining"], json!(true));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::spawn().await;
    let response = app.get("/metrics").await;
    assert_eq!(response.status().as_u16(), 200);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
}
