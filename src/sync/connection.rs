use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SyncSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Exponential reconnect delays: `base * 2^attempt`, capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            base_delay_ms: settings.base_reconnect_delay_ms,
            max_delay_ms: settings.max_reconnect_delay_ms,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Realtime connection lifecycle.
///
/// Failures move to `Reconnecting` with a growing delay until
/// `max_attempts` is spent, after which the link is marked degraded and
/// parked in `Disconnected`. A successful connect clears the degraded flag.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    failed_attempts: u32,
    degraded: bool,
}

impl ConnectionStateMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            failed_attempts: 0,
            degraded: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn connected(&mut self) {
        if self.degraded {
            info!("Sync connection restored");
        }
        self.state = ConnectionState::Connected;
        self.failed_attempts = 0;
        self.degraded = false;
    }

    /// Record a failed connect or a dropped link. Returns the delay before the
    /// next attempt, or `None` once attempts are exhausted.
    pub fn failed(&mut self) -> Option<Duration> {
        if self.failed_attempts >= self.policy.max_attempts {
            if !self.degraded {
                warn!(
                    "Sync degraded after {} reconnect attempts",
                    self.failed_attempts
                );
            }
            self.degraded = true;
            self.state = ConnectionState::Disconnected;
            return None;
        }
        let attempt = self.failed_attempts;
        self.failed_attempts += 1;
        self.state = ConnectionState::Reconnecting { attempt };
        Some(self.policy.delay(attempt))
    }

    /// Start over after a degraded period; the degraded flag stays until a connect succeeds.
    pub fn reset_attempts(&mut self) {
        self.failed_attempts = 0;
        self.state = ConnectionState::Disconnected;
    }
}

/// Tracks heartbeats on a push channel. Two missed intervals mean the
/// connection should be re-established.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval_ms: i64,
    last_seen: i64,
}

pub const MISSED_HEARTBEATS_BEFORE_RECONNECT: i64 = 2;

impl HeartbeatMonitor {
    pub fn new(interval: Duration, now: i64) -> Self {
        Self {
            interval_ms: interval.as_millis().max(1) as i64,
            last_seen: now,
        }
    }

    pub fn beat(&mut self, now: i64) {
        self.last_seen = self.last_seen.max(now);
    }

    pub fn missed(&self, now: i64) -> i64 {
        ((now - self.last_seen) / self.interval_ms).max(0)
    }

    pub fn should_reconnect(&self, now: i64) -> bool {
        self.missed(now) >= MISSED_HEARTBEATS_BEFORE_RECONNECT
    }
}
