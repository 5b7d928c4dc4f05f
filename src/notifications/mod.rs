//! Notification records, errors and user preferences.

mod error;
mod models;
mod preferences;

pub use error::{
    ErrorClassification, ErrorReporter, LoggingErrorReporter, NotificationError,
    NotificationResult, Severity,
};
pub use models::{
    now_millis, Notification, NotificationAction, NotificationFilter, NotificationPatch,
    NotificationType, NotifyOptions, Priority, QueryResult,
};
pub use preferences::{
    DeliveryChannel, NotificationPreferences, PreferencesStore, TypePreference,
};
