//! Gateway Protocol Tests
//!
//! Hello / Identify / Ready, dispatch ordering, and the close codes for each
//! protocol violation.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{test_settings, token_with_expiry, TestApp};

#[tokio::test]
async fn test_hello_then_ready_with_first_sequence() {
    let app = TestApp::spawn().await;
    app.add_user(1, &[100]);

    let mut conn = app.connect().await;
    let hello = conn.recv().await;
    assert_eq!(hello.op, 10);
    let interval = hello.d.as_ref().unwrap()["heartbeat_interval"].as_u64().unwrap();
    assert!((40_000..=41_250).contains(&interval), "interval {}", interval);

    conn.send_identify(&crate::common::token_for(1)).await;
    let ready = conn.recv().await;
    assert_eq!(ready.op, 0);
    assert_eq!(ready.t.as_deref(), Some("READY"));
    assert_eq!(ready.s, Some(1));

    let d = ready.d.unwrap();
    assert_eq!(d["v"], json!(10));
    assert_eq!(d["user"]["id"], json!("1"));
    assert_eq!(d["guilds"][0]["id"], json!("100"));
    assert!(!d["session_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_guild_event_fans_out_in_order() {
    let app = TestApp::spawn().await;
    app.add_user(1, &[100]);
    app.add_user(2, &[100]);

    let (mut alice, _) = app.identify(1).await;
    let (mut bob, _) = app.identify(2).await;
    let (mut carol, _) = app.identify(3).await;

    for id in 1..=3 {
        let response = app
            .publish(json!({
                "type": "MESSAGE_CREATE",
                "guild_id": "100",
                "data": {"id": id.to_string(), "content": "hi"}
            }))
            .await;
        assert_eq!(response.status().as_u16(), 202);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["delivered"], json!(2));
    }

    for conn in [&mut alice, &mut bob] {
        let mut last_sequence = 0;
        for id in 1..=3 {
            let frame = conn.recv_dispatch("MESSAGE_CREATE").await;
            let sequence = frame.s.unwrap();
            assert!(sequence > last_sequence);
            last_sequence = sequence;
            assert_eq!(frame.d.unwrap()["id"], json!(id.to_string()));
        }
    }

    // carol has no guilds, so the user-scoped event is the first dispatch
    // she sees after READY
    app.publish(json!({
        "type": "RELATIONSHIP_ADD",
        "user_id": "3",
        "data": {"id": "1"}
    }))
    .await;
    let frame = carol.recv().await;
    assert_eq!(frame.t.as_deref(), Some("RELATIONSHIP_ADD"));
    assert_eq!(frame.s, Some(2));
}

#[tokio::test]
async fn test_channel_recipients_receive_event_once() {
    let app = TestApp::spawn().await;
    let (mut alice, _) = app.identify(1).await;
    let (mut bob, _) = app.identify(2).await;

    let response = app
        .publish(json!({
            "type": "MESSAGE_CREATE",
            "channel_id": "500",
            "recipient_ids": ["1", "2", "1"],
            "data": {"id": "9"}
        }))
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], json!(2));

    for conn in [&mut alice, &mut bob] {
        let frame = conn.recv().await;
        assert_eq!(frame.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.s, Some(2));
    }
}

#[tokio::test]
async fn test_heartbeat_is_acknowledged() {
    let app = TestApp::spawn().await;
    let (mut conn, _) = app.identify(1).await;

    conn.send_json(json!({"op": 1, "d": 1})).await;
    let ack = conn.recv().await;
    assert_eq!(ack.op, 11);
}

#[tokio::test]
async fn test_invalid_token_closes_with_4004() {
    let app = TestApp::spawn().await;
    let mut conn = app.connect().await;
    conn.recv().await;

    conn.send_identify("not-a-jwt").await;
    assert_eq!(conn.recv_close().await, Some(4004));
}

#[tokio::test]
async fn test_expired_token_closes_with_4004() {
    let app = TestApp::spawn().await;
    let mut conn = app.connect().await;
    conn.recv().await;

    let expired = token_with_expiry(1, chrono::Utc::now().timestamp() - 3600);
    conn.send_identify(&expired).await;
    assert_eq!(conn.recv_close().await, Some(4004));
}

#[tokio::test]
async fn test_frame_before_identify_closes_with_4003() {
    let app = TestApp::spawn().await;
    let mut conn = app.connect().await;
    conn.recv().await;

    conn.send_json(json!({"op": 1, "d": null})).await;
    assert_eq!(conn.recv_close().await, Some(4003));
}

#[tokio::test]
async fn test_second_identify_closes_with_4005() {
    let app = TestApp::spawn().await;
    let (mut conn, _) = app.identify(1).await;

    conn.send_identify(&crate::common::token_for(1)).await;
    assert_eq!(conn.recv_close().await, Some(4005));
}

#[tokio::test]
async fn test_malformed_frame_closes_with_4002() {
    let app = TestApp::spawn().await;
    let (mut conn, _) = app.identify(1).await;

    conn.send_text("{not json".into()).await;
    assert_eq!(conn.recv_close().await, Some(4002));
}

#[tokio::test]
async fn test_unknown_opcode_closes_with_4001() {
    let app = TestApp::spawn().await;
    let (mut conn, _) = app.identify(1).await;

    conn.send_json(json!({"op": 42, "d": {}})).await;
    assert_eq!(conn.recv_close().await, Some(4001));
}

#[tokio::test]
async fn test_wide_unknown_opcode_closes_with_4001() {
    let app = TestApp::spawn().await;
    let (mut conn, _) = app.identify(1).await;

    conn.send_json(json!({"op": 300, "d": {}})).await;
    assert_eq!(conn.recv_close().await, Some(4001));
}

#[tokio::test]
async fn test_identify_timeout_closes_with_4009() {
    let mut settings = test_settings();
    settings.gateway.identify_timeout_secs = 1;
    let app = TestApp::spawn_with(settings).await;

    let mut conn = app.connect().await;
    conn.recv().await;
    assert_eq!(conn.recv_close().await, Some(4009));
}

#[tokio::test]
async fn test_silent_session_is_timed_out_and_released() {
    let mut settings = test_settings();
    settings.gateway.heartbeat_interval_ms = 1_000;
    settings.gateway.heartbeat_jitter_ms = 100;
    settings.gateway.heartbeat_grace_ms = 200;
    settings.gateway.sweep_interval_ms = 100;
    let app = TestApp::spawn_with(settings).await;

    let (mut conn, _) = app.identify(1).await;
    assert_eq!(app.gateway.session_count(), 1);

    // Never heartbeat
    assert_eq!(conn.recv_close().await, Some(4009));

    let released = tokio::time::timeout(Duration::from_secs(2), async {
        while app.gateway.session_count() != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "session still registered after timeout close");
}

#[tokio::test]
async fn test_session_limit_closes_with_4011() {
    let mut settings = test_settings();
    settings.gateway.max_sessions_per_user = 1;
    let app = TestApp::spawn_with(settings).await;

    let (_first, _) = app.identify(1).await;
    let mut second = app.connect().await;
    second.recv().await;
    second.send_identify(&crate::common::token_for(1)).await;
    assert_eq!(second.recv_close().await, Some(4011));
}

#[tokio::test]
async fn test_invalidated_session_can_identify_again() {
    let app = TestApp::spawn().await;
    let (mut conn, _) = app.identify(1).await;

    let response = app
        .post_internal("/internal/users/1/invalidate", &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["sessions"], json!(1));

    let invalid = conn.recv().await;
    assert_eq!(invalid.op, 9);
    assert_eq!(invalid.d, Some(json!(false)));
    assert_eq!(conn.recv_close().await, Some(4007));

    let (_conn, ready) = app.identify(1).await;
    assert_eq!(ready.s, Some(1));
}

#[tokio::test]
async fn test_drain_asks_clients_to_reconnect() {
    let app = TestApp::spawn().await;
    let (mut conn, _) = app.identify(1).await;

    assert_eq!(app.gateway.request_reconnect_all(), 1);

    let reconnect = conn.recv().await;
    assert_eq!(reconnect.op, 7);
    assert_eq!(conn.recv_close().await, Some(4010));
}
