use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all notification hub metrics
const PREFIX: &str = "notification_hub";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Notification Metrics
    pub static ref NOTIFICATIONS_CREATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_notifications_created_total"), "Notifications created"),
        &["type", "priority"]
    ).expect("Failed to create notifications_created_total metric");

    pub static ref DELIVERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_deliveries_total"), "Subscriber delivery attempts"),
        &["status"]
    ).expect("Failed to create deliveries_total metric");

    pub static ref DELIVERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_delivery_duration_seconds"),
            "Subscriber callback duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["status"]
    ).expect("Failed to create delivery_duration_seconds metric");

    pub static ref QUEUE_LENGTH: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_queue_length"), "Items waiting in a queue"),
        &["queue"]
    ).expect("Failed to create queue_length metric");

    pub static ref STORED_NOTIFICATIONS: IntGauge = IntGauge::new(
        format!("{PREFIX}_stored_notifications"),
        "Notifications currently held by the store"
    ).expect("Failed to create stored_notifications metric");

    pub static ref SYNC_OPERATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_sync_operations_total"), "Sync operations by outcome"),
        &["outcome"]
    ).expect("Failed to create sync_operations_total metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by code and endpoint"),
        &["code", "endpoint"]
    ).expect("Failed to create errors_total metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (tests init more than once)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(NOTIFICATIONS_CREATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DELIVERIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DELIVERY_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_LENGTH.clone()));
    let _ = REGISTRY.register(Box::new(STORED_NOTIFICATIONS.clone()));
    let _ = REGISTRY.register(Box::new(SYNC_OPERATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_notification_created(notification_type: &str, priority: &str) {
    NOTIFICATIONS_CREATED_TOTAL
        .with_label_values(&[notification_type, priority])
        .inc();
}

pub fn record_delivery(success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    DELIVERIES_TOTAL.with_label_values(&[status]).inc();
    DELIVERY_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration.as_secs_f64());
}

pub fn set_queue_length(queue: &str, length: usize) {
    QUEUE_LENGTH.with_label_values(&[queue]).set(length as f64);
}

pub fn set_stored_notifications(count: usize) {
    STORED_NOTIFICATIONS.set(count as i64);
}

pub fn record_sync_operation(outcome: &str, count: usize) {
    if count > 0 {
        SYNC_OPERATIONS_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

pub fn record_error(code: &str, endpoint: &str) {
    ERRORS_TOTAL.with_label_values(&[code, endpoint]).inc();
}

/// Collapse path parameters so per-user routes share a label.
pub fn categorize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["notifications", "preferences", _] => "/notifications/preferences/{user}".to_string(),
        ["notifications", _, "read"] => "/notifications/{user}/read".to_string(),
        ["notifications", _, "unread-count"] => "/notifications/{user}/unread-count".to_string(),
        ["notifications", _, "read-all"] => "/notifications/{user}/read-all".to_string(),
        ["notifications", _] => "/notifications/{user}".to_string(),
        ["ws", _] => "/ws/{user}".to_string(),
        _ => path.to_string(),
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
