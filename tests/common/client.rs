//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per server endpoint. When routes or
//! request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ========================================================================
    // Server
    // ========================================================================

    pub async fn get_stats(&self) -> Response {
        self.client
            .get(self.url("/"))
            .send()
            .await
            .expect("Stats request failed")
    }

    pub async fn get_metrics(&self) -> Response {
        self.client
            .get(self.url("/metrics"))
            .send()
            .await
            .expect("Metrics request failed")
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// POST /notifications with an arbitrary body
    pub async fn create_notification(&self, body: Value) -> Response {
        self.client
            .post(self.url("/notifications"))
            .json(&body)
            .send()
            .await
            .expect("Create notification request failed")
    }

    /// Creates a notification for `user_id` and returns its JSON
    pub async fn notify_user(
        &self,
        user_id: &str,
        notification_type: &str,
        title: &str,
        priority: &str,
    ) -> Value {
        let response = self
            .create_notification(json!({
                "type": notification_type,
                "title": title,
                "message": format!("{} message", title),
                "priority": priority,
                "user_id": user_id,
            }))
            .await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Failed to create notification"
        );
        response.json().await.expect("Invalid notification JSON")
    }

    pub async fn create_from_template(&self, body: Value) -> Response {
        self.client
            .post(self.url("/notifications/template"))
            .json(&body)
            .send()
            .await
            .expect("Template request failed")
    }

    pub async fn schedule(&self, body: Value) -> Response {
        self.client
            .post(self.url("/notifications/schedule"))
            .json(&body)
            .send()
            .await
            .expect("Schedule request failed")
    }

    pub async fn cancel_schedule(&self, schedule_id: &str) -> Response {
        self.client
            .delete(self.url(&format!("/notifications/schedule/{}", schedule_id)))
            .send()
            .await
            .expect("Cancel schedule request failed")
    }

    /// GET /notifications/{user} with a raw query string
    pub async fn get_notifications(&self, user_id: &str, query: &str) -> Response {
        let path = if query.is_empty() {
            format!("/notifications/{}", user_id)
        } else {
            format!("/notifications/{}?{}", user_id, query)
        };
        self.client
            .get(self.url(&path))
            .send()
            .await
            .expect("Get notifications request failed")
    }

    pub async fn mark_read(&self, user_id: &str, ids: &[&str]) -> Response {
        self.client
            .post(self.url(&format!("/notifications/{}/read", user_id)))
            .json(&json!({ "ids": ids }))
            .send()
            .await
            .expect("Mark read request failed")
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Response {
        self.client
            .post(self.url(&format!("/notifications/{}/read-all", user_id)))
            .send()
            .await
            .expect("Mark all read request failed")
    }

    pub async fn unread_count(&self, user_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/notifications/{}/unread-count", user_id)))
            .send()
            .await
            .expect("Unread count request failed")
    }

    pub async fn delete_notifications(&self, user_id: &str, ids: &[&str]) -> Response {
        self.client
            .delete(self.url(&format!("/notifications/{}", user_id)))
            .json(&ids)
            .send()
            .await
            .expect("Delete request failed")
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    pub async fn get_preferences(&self, user_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/notifications/preferences/{}", user_id)))
            .send()
            .await
            .expect("Get preferences request failed")
    }

    pub async fn put_preferences(&self, user_id: &str, preferences: Value) -> Response {
        self.client
            .put(self.url(&format!("/notifications/preferences/{}", user_id)))
            .json(&preferences)
            .send()
            .await
            .expect("Put preferences request failed")
    }

    // ========================================================================
    // Export / Import
    // ========================================================================

    pub async fn export(&self, query: &str) -> Response {
        self.client
            .get(self.url(&format!("/export?{}", query)))
            .send()
            .await
            .expect("Export request failed")
    }

    pub async fn import(&self, query: &str, body: Vec<u8>) -> Response {
        self.client
            .post(self.url(&format!("/import?{}", query)))
            .body(body)
            .send()
            .await
            .expect("Import request failed")
    }
}
