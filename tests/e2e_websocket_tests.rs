//! End-to-end tests for the websocket push channel

mod common;

use common::{TestClient, TestServer, ALICE, BOB, PUSH_TIMEOUT_SECS};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_ws(server: &TestServer, user_id: &str) -> WsStream {
    let (ws_stream, _) = connect_async(server.ws_url(user_id))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Wait for a specific message type, timing out after duration
async fn wait_for_message(
    ws: &mut WsStream,
    expected_type: &str,
    timeout_duration: Duration,
) -> Option<Value> {
    let result = timeout(timeout_duration, async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if let Ok(json) = serde_json::from_str::<Value>(&text) {
                    if json.get("type").and_then(|t| t.as_str()) == Some(expected_type) {
                        return Some(json);
                    }
                }
            }
        }
        None
    })
    .await;

    result.ok().flatten()
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send websocket message");
}

fn push_timeout() -> Duration {
    Duration::from_secs(PUSH_TIMEOUT_SECS)
}

#[tokio::test]
async fn test_connected_message_on_open() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ws(&server, ALICE).await;

    let connected = wait_for_message(&mut ws, "connected", push_timeout())
        .await
        .expect("Should receive connected message");
    assert!(connected["data"]["connection_id"].is_string());
    assert_eq!(connected["data"]["heartbeat_interval_secs"], 1);
}

#[tokio::test]
async fn test_notification_is_pushed_to_its_user_only() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let mut alice_ws = connect_ws(&server, ALICE).await;
    let mut bob_ws = connect_ws(&server, BOB).await;
    wait_for_message(&mut alice_ws, "connected", push_timeout()).await;
    wait_for_message(&mut bob_ws, "connected", push_timeout()).await;

    let created = client.notify_user(ALICE, "NFT_SOLD", "Sold", "HIGH").await;

    let pushed = wait_for_message(&mut alice_ws, "notification", push_timeout())
        .await
        .expect("Alice should receive the notification");
    assert_eq!(pushed["data"]["id"], created["id"]);
    assert_eq!(pushed["data"]["title"], "Sold");

    let leaked = wait_for_message(&mut bob_ws, "notification", Duration::from_millis(500)).await;
    assert!(leaked.is_none(), "Bob must not receive Alice's notification");
}

#[tokio::test]
async fn test_broadcast_reaches_every_connection() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let mut alice_ws = connect_ws(&server, ALICE).await;
    let mut bob_ws = connect_ws(&server, BOB).await;
    wait_for_message(&mut alice_ws, "connected", push_timeout()).await;
    wait_for_message(&mut bob_ws, "connected", push_timeout()).await;

    let response = client
        .create_notification(json!({
            "type": "SYSTEM", "title": "Maintenance", "message": "at midnight"
        }))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    for ws in [&mut alice_ws, &mut bob_ws] {
        let pushed = wait_for_message(ws, "notification", push_timeout())
            .await
            .expect("Broadcast should reach every user");
        assert_eq!(pushed["data"]["title"], "Maintenance");
    }
}

#[tokio::test]
async fn test_heartbeats_are_sent() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ws(&server, ALICE).await;

    let heartbeat = wait_for_message(&mut ws, "heartbeat", push_timeout())
        .await
        .expect("Should receive a heartbeat");
    assert!(heartbeat.get("data").is_none());
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ws(&server, ALICE).await;
    wait_for_message(&mut ws, "connected", push_timeout()).await;

    send_json(&mut ws, json!({"type": "ping"})).await;
    let pong = wait_for_message(&mut ws, "pong", push_timeout()).await;
    assert!(pong.is_some(), "Should receive pong");
}

#[tokio::test]
async fn test_ack_marks_notifications_read() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let mut ws = connect_ws(&server, ALICE).await;
    wait_for_message(&mut ws, "connected", push_timeout()).await;

    let created = client.notify_user(ALICE, "NFT_BID", "Bid", "MEDIUM").await;
    let pushed = wait_for_message(&mut ws, "notification", push_timeout())
        .await
        .expect("Should receive the notification");

    send_json(
        &mut ws,
        json!({"type": "ack", "data": {"ids": [pushed["data"]["id"]]}}),
    )
    .await;

    let deadline = std::time::Instant::now() + push_timeout();
    loop {
        let count: Value = client.unread_count(ALICE).await.json().await.unwrap();
        if count["count"] == 0 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "Ack did not mark {} read",
            created["id"]
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_unknown_message_gets_error_frame() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ws(&server, ALICE).await;
    wait_for_message(&mut ws, "connected", push_timeout()).await;

    send_json(&mut ws, json!({"type": "subscribe-everything"})).await;
    let error = wait_for_message(&mut ws, "error", push_timeout())
        .await
        .expect("Should receive an error frame");
    assert!(error["data"]["code"].is_string());
}

#[tokio::test]
async fn test_connection_count_in_stats() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let mut ws = connect_ws(&server, ALICE).await;
    wait_for_message(&mut ws, "connected", push_timeout()).await;

    let stats: Value = client.get_stats().await.json().await.unwrap();
    assert_eq!(stats["connections"], 1);

    ws.close(None).await.expect("Failed to close websocket");
    drop(ws);

    let deadline = std::time::Instant::now() + push_timeout();
    loop {
        let stats: Value = client.get_stats().await.json().await.unwrap();
        if stats["connections"] == 0 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "Connection was not released");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
