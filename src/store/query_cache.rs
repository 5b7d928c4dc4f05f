use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::notifications::{NotificationFilter, QueryResult};

pub const DEFAULT_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Bounded TTL cache of query results. Lookups use `peek`, so recency is
/// never refreshed and the oldest inserted entry is evicted first.
/// A capacity of zero disables caching.
#[derive(Debug)]
pub struct QueryCache {
    ttl: Duration,
    entries: Option<LruCache<NotificationFilter, (Instant, QueryResult)>>,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn get(&mut self, filter: &NotificationFilter) -> Option<QueryResult> {
        let entries = self.entries.as_mut()?;
        let (inserted_at, result) = entries.peek(filter)?;
        if inserted_at.elapsed() < self.ttl {
            return Some(result.clone());
        }
        entries.pop(filter);
        None
    }

    pub fn put(&mut self, filter: NotificationFilter, result: QueryResult) {
        if let Some(entries) = self.entries.as_mut() {
            // re-inserting counts as a fresh insertion
            entries.pop(&filter);
            entries.push(filter, (Instant::now(), result));
        }
    }

    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}
