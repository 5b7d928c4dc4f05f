//! Notification Hub Library
//!
//! Storage, routing and delivery of typed notifications, exposed for the
//! `notification-server` binary and for tests.

pub mod archive;
pub mod config;
pub mod export;
pub mod groups;
pub mod kv_store;
pub mod manager;
pub mod notifications;
pub mod optimizer;
pub mod priority;
pub mod pubsub;
pub mod retry_policy;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod sqlite_persistence;
pub mod store;
pub mod sync;
pub mod templates;

// Re-export commonly used types for convenience
pub use manager::NotificationManager;
pub use notifications::{Notification, NotificationError, NotificationType, Priority};
pub use server::{run_server, RequestsLoggingLevel};
