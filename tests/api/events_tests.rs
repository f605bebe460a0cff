//! Internal Publish API Tests

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::TestApp;

#[tokio::test]
async fn test_publish_requires_internal_token() {
    let app = TestApp::spawn().await;
    let body = json!({"type": "MESSAGE_CREATE", "guild_id": "1", "data": {}});

    let missing = app
        .http
        .post(app.url("/internal/events"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 401);

    let wrong = app
        .http
        .post(app.url("/internal/events"))
        .bearer_auth("wrong-token-value")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 401);
}

#[tokio::test]
async fn test_publish_without_sessions_is_accepted() {
    let app = TestApp::spawn().await;
    let response = app
        .publish(json!({"type": "GUILD_UPDATE", "guild_id": "1", "data": {"id": "1"}}))
        .await;
    assert_eq!(response.status().as_u16(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"delivered": 0}));
}

#[tokio::test]
async fn test_publish_rejects_bad_envelopes() {
    let app = TestApp::spawn().await;

    for body in [
        json!({"type": "NOT_AN_EVENT", "guild_id": "1", "data": {}}),
        json!({"type": "READY", "user_id": "1", "data": {}}),
        json!({"type": "MESSAGE_CREATE", "data": {}}),
        json!({"type": "MESSAGE_CREATE", "guild_id": "1", "user_id": "2", "data": {}}),
        json!({"type": "MESSAGE_CREATE", "channel_id": "1", "data": {}}),
    ] {
        let response = app.publish(body.clone()).await;
        assert_eq!(response.status().as_u16(), 400, "body {}", body);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["code"], json!(10002));
    }
}

#[tokio::test]
async fn test_publish_rejects_malformed_json() {
    let app = TestApp::spawn().await;
    let response = app
        .http
        .post(app.url("/internal/events"))
        .bearer_auth(crate::common::INTERNAL_TOKEN)
        .header("Content-Type", "application/json")
        .body("{\"type\":")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_invalidate_rejects_bad_user_id() {
    let app = TestApp::spawn().await;
    let response = app
        .post_internal("/internal/users/abc/invalidate", &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_invalidate_unknown_user_closes_nothing() {
    let app = TestApp::spawn().await;
    let response = app
        .post_internal("/internal/users/99/invalidate", &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["sessions"], json!(0));
}
