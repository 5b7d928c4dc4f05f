//! Random slowdown middleware for exercising client timeouts and retries.

use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use rand::Rng;

const MAX_DELAY_MS: u64 = 2_000;

/// Delay each request by a uniformly random 0-2s.
pub async fn slowdown_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let delay = rand::rng().random_range(0..=MAX_DELAY_MS);
    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    next.run(request).await
}
