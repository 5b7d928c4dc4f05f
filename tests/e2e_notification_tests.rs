//! End-to-end tests for the notification HTTP API

mod common;

use common::{TestClient, TestServer, ALICE, BOB};
use notification_hub::notifications::now_millis;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_stats_endpoint_reports_store() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    client.notify_user(ALICE, "SYSTEM", "Maintenance", "LOW").await;

    let response = client.get_stats().await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats: Value = response.json().await.unwrap();
    assert_eq!(stats["notifications"]["store"]["total"], 1);
    assert!(stats["uptime"].as_str().unwrap().starts_with("0d"));
}

#[tokio::test]
async fn test_notifications_are_scoped_per_user() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    client.notify_user(ALICE, "NFT_BID", "Bid on #1", "HIGH").await;
    client.notify_user(ALICE, "NFT_SOLD", "Sold #2", "MEDIUM").await;
    client.notify_user(BOB, "NFT_BID", "Bid on #3", "LOW").await;

    let response = client.get_notifications(ALICE, "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["total"], 2);

    let page: Value = client
        .get_notifications(ALICE, "type=NFT_BID")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["notifications"][0]["title"], "Bid on #1");

    let page: Value = client
        .get_notifications(ALICE, "limit=1&offset=1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["notifications"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_read_flow_updates_unread_count() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let first = client.notify_user(ALICE, "SYSTEM", "One", "MEDIUM").await;
    client.notify_user(ALICE, "SYSTEM", "Two", "MEDIUM").await;
    client.notify_user(ALICE, "SYSTEM", "Three", "MEDIUM").await;

    let count: Value = client.unread_count(ALICE).await.json().await.unwrap();
    assert_eq!(count["count"], 3);

    let id = first["id"].as_str().unwrap();
    let response = client.mark_read(ALICE, &[id]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated[0]["read"], true);

    let count: Value = client.unread_count(ALICE).await.json().await.unwrap();
    assert_eq!(count["count"], 2);

    let page: Value = client
        .get_notifications(ALICE, "unreadOnly=true")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 2);

    let response = client.mark_all_read(ALICE).await;
    assert_eq!(response.status(), StatusCode::OK);
    let marked: Value = response.json().await.unwrap();
    assert_eq!(marked["count"], 2);

    let count: Value = client.unread_count(ALICE).await.json().await.unwrap();
    assert_eq!(count["count"], 0);
}

#[tokio::test]
async fn test_cannot_touch_another_users_notifications() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let created = client.notify_user(ALICE, "SECURITY", "Login", "URGENT").await;
    let id = created["id"].as_str().unwrap();

    let response = client.mark_read(BOB, &[id]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");

    let response = client.delete_notifications(BOB, &[id]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.delete_notifications(ALICE, &[id]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 1);

    let page: Value = client
        .get_notifications(ALICE, "")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn test_invalid_notification_is_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .create_notification(json!({"type": "SYSTEM", "title": "", "message": "m"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let response = client
        .create_notification(json!({"type": "NOT_A_TYPE", "title": "t", "message": "m"}))
        .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_template_rendering() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .create_from_template(json!({
            "template": "nft_listed",
            "vars": {"collection": "Apes", "item": "Ape #7", "price": "3 ETH"},
            "user_id": ALICE,
        }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["title"], "Apes listed");
    assert_eq!(created["message"], "Ape #7 was listed for 3 ETH");
    assert_eq!(created["type"], "NFT_LISTED");

    let response = client
        .create_from_template(json!({"template": "nft_listed", "vars": {"collection": "Apes"}}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .create_from_template(json!({"template": "no_such_template"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preferences_suppress_notifications() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let defaults: Value = client.get_preferences(ALICE).await.json().await.unwrap();
    assert_eq!(defaults["types"], json!({}));

    let response = client
        .put_preferences(
            ALICE,
            json!({
                "types": {
                    "PRICE_ALERT": {"enabled": false, "channels": [], "min_priority": "LOW"},
                    "NFT_BID": {"enabled": true, "channels": ["in_app"], "min_priority": "HIGH"}
                }
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .create_notification(json!({
            "type": "PRICE_ALERT", "title": "ETH", "message": "up", "user_id": ALICE
        }))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .create_notification(json!({
            "type": "NFT_BID", "title": "Small bid", "message": "0.01",
            "priority": "LOW", "user_id": ALICE
        }))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    client.notify_user(ALICE, "NFT_BID", "Big bid", "URGENT").await;

    let page: Value = client
        .get_notifications(ALICE, "")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["notifications"][0]["title"], "Big bid");

    let stored: Value = client.get_preferences(ALICE).await.json().await.unwrap();
    assert_eq!(stored["types"]["PRICE_ALERT"]["enabled"], false);
}

#[tokio::test]
async fn test_scheduled_notification_is_delivered_once() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .schedule(json!({
            "type": "SYSTEM",
            "title": "Later",
            "message": "scheduled",
            "user_id": ALICE,
            "schedule": {"start": now_millis() + 200}
        }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let scheduled: Value = response.json().await.unwrap();
    assert_eq!(scheduled["status"], "active");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let page: Value = client
            .get_notifications(ALICE, "")
            .await
            .json()
            .await
            .unwrap();
        if page["total"] == 1 {
            assert_eq!(page["notifications"][0]["title"], "Later");
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "Scheduled notification was not delivered"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let response = client.cancel_schedule("no-such-schedule").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancelled_schedule_never_fires() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .schedule(json!({
            "type": "SYSTEM",
            "title": "Never",
            "message": "cancelled",
            "user_id": ALICE,
            "schedule": {"start": now_millis() + 300}
        }))
        .await;
    let scheduled: Value = response.json().await.unwrap();
    let schedule_id = scheduled["id"].as_str().unwrap();

    let response = client.cancel_schedule(schedule_id).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let page: Value = client
        .get_notifications(ALICE, "")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn test_export_then_import_into_another_server() {
    let source = TestServer::spawn().await;
    let source_client = TestClient::new(source.base_url.clone());
    source_client.notify_user(ALICE, "NFT_SOLD", "Sold", "HIGH").await;
    source_client.notify_user(ALICE, "TOKEN_TRANSFER", "Received", "MEDIUM").await;
    source_client.notify_user(BOB, "SYSTEM", "Other user", "LOW").await;

    let response = source_client
        .export(&format!("format=json&user={}&compress=true", ALICE))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/gzip"
    );
    let exported = response.bytes().await.unwrap().to_vec();

    let target = TestServer::spawn().await;
    let target_client = TestClient::new(target.base_url.clone());
    let response = target_client.import("format=json", exported.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["imported"], 2);
    assert_eq!(report["errors"], json!([]));

    let page: Value = target_client
        .get_notifications(ALICE, "")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 2);

    // Same ids again are reported per record, not as a failed request.
    let report: Value = target_client
        .import("format=json", exported)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["imported"], 0);
    assert_eq!(report["errors"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_json_export_with_metadata() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    client.notify_user(ALICE, "SYSTEM", "Hello", "LOW").await;

    let response = client.export("format=json&metadata=true").await;
    assert_eq!(response.status(), StatusCode::OK);
    let envelope: Value = response.json().await.unwrap();
    assert_eq!(envelope["count"], 1);
    assert!(envelope["checksum"].is_string());

    let response = client.import("format=json", b"not json".to_vec()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_record_requests() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    client.notify_user(ALICE, "SYSTEM", "Counted", "LOW").await;

    let response = client.get_metrics().await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("http_requests_total"));
}
