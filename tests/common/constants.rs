//! Shared constants for end-to-end tests

// ============================================================================
// Test Users
// ============================================================================

pub const ALICE: &str = "alice";

pub const BOB: &str = "bob";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Default timeout for HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long to wait for a pushed websocket frame (seconds)
pub const PUSH_TIMEOUT_SECS: u64 = 5;
