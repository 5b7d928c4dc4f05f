//! Indexed, transactional notification store.

mod indices;
mod query_cache;
#[allow(clippy::module_inception)]
mod store;
mod transaction;

pub use indices::{IndexKey, Indices};
pub use query_cache::{QueryCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use store::{NotificationStore, StoreChange, StoreOp, StoreStats, NOTIFICATION_KEY_PREFIX};
pub use transaction::Transaction;
