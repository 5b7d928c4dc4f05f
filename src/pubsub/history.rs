use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;

/// One delivery attempt to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryAttempt {
    pub subscriber_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub success: bool,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub timestamp: i64,
}

/// Per-event delivery log, bounded by number of events. Appending to an
/// existing event does not refresh it, so the oldest event goes first.
#[derive(Debug)]
pub struct DeliveryHistory {
    events: Option<LruCache<String, Vec<DeliveryAttempt>>>,
}

impl DeliveryHistory {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: NonZeroUsize::new(max_events).map(LruCache::new),
        }
    }

    pub fn record(&mut self, event_id: &str, attempt: DeliveryAttempt) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        match events.peek_mut(event_id) {
            Some(attempts) => attempts.push(attempt),
            None => {
                events.push(event_id.to_string(), vec![attempt]);
            }
        }
    }

    pub fn get(&self, event_id: &str) -> Vec<DeliveryAttempt> {
        self.events
            .as_ref()
            .and_then(|events| events.peek(event_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.as_ref().map_or(0, |events| events.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
