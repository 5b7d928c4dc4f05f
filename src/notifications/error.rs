//! Error taxonomy shared by every notification component.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors produced by the notification engine.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Sync conflict on {0}")]
    SyncConflict(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        attempts: u32,
        last_error: Box<NotificationError>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Import error: {0}")]
    Import(String),
}

impl NotificationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            NotificationError::Validation(_) => "VALIDATION_ERROR",
            NotificationError::NotFound(_) => "NOT_FOUND",
            NotificationError::DeliveryFailed(_) => "DELIVERY_FAILED",
            NotificationError::SubscriptionFailed(_) => "SUBSCRIPTION_FAILED",
            NotificationError::SyncConflict(_) => "SYNC_CONFLICT",
            NotificationError::Encryption(_) => "ENCRYPTION_ERROR",
            NotificationError::Decryption(_) => "DECRYPTION_ERROR",
            NotificationError::AccessDenied(_) => "ACCESS_DENIED",
            NotificationError::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            NotificationError::Storage(_) => "STORAGE_ERROR",
            NotificationError::Export(_) => "EXPORT_ERROR",
            NotificationError::Import(_) => "IMPORT_ERROR",
        }
    }

    /// Only transient delivery and storage failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NotificationError::DeliveryFailed(_) | NotificationError::Storage(_)
        )
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            NotificationError::Validation(_)
            | NotificationError::Import(_)
            | NotificationError::SyncConflict(_) => 400,
            NotificationError::NotFound(_) => 404,
            NotificationError::AccessDenied(_) => 403,
            NotificationError::DeliveryFailed(_)
            | NotificationError::SubscriptionFailed(_)
            | NotificationError::MaxRetriesExceeded { .. } => 502,
            NotificationError::Encryption(_)
            | NotificationError::Decryption(_)
            | NotificationError::Storage(_)
            | NotificationError::Export(_) => 500,
        }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        NotificationError::DeliveryFailed(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        NotificationError::NotFound(id.into())
    }
}

pub type NotificationResult<T> = Result<T, NotificationError>;

/// How bad an error is, as seen by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorClassification {
    pub severity: Severity,
    pub retryable: bool,
}

/// Sink for errors that should be surfaced to an alerting subsystem.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, err: &NotificationError) -> ErrorClassification;
}

/// Default reporter: classifies the error and logs it.
#[derive(Debug, Default, Clone)]
pub struct LoggingErrorReporter;

impl LoggingErrorReporter {
    pub fn classify(err: &NotificationError) -> ErrorClassification {
        let severity = match err {
            NotificationError::Validation(_) | NotificationError::NotFound(_) => Severity::Low,
            NotificationError::DeliveryFailed(_)
            | NotificationError::SubscriptionFailed(_)
            | NotificationError::SyncConflict(_)
            | NotificationError::Export(_)
            | NotificationError::Import(_) => Severity::Medium,
            NotificationError::MaxRetriesExceeded { .. } | NotificationError::Storage(_) => {
                Severity::High
            }
            NotificationError::Encryption(_)
            | NotificationError::Decryption(_)
            | NotificationError::AccessDenied(_) => Severity::Critical,
        };
        ErrorClassification {
            severity,
            retryable: err.is_retryable(),
        }
    }
}

impl ErrorReporter for LoggingErrorReporter {
    fn report(&self, err: &NotificationError) -> ErrorClassification {
        let classification = Self::classify(err);
        match classification.severity {
            Severity::Low | Severity::Medium => {
                warn!("[{}] {} (retryable={})", err.code(), err, classification.retryable)
            }
            Severity::High | Severity::Critical => {
                error!("[{}] {} (retryable={})", err.code(), err, classification.retryable)
            }
        }
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(NotificationError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(NotificationError::AccessDenied("x".into()).code(), "ACCESS_DENIED");
        assert_eq!(
            NotificationError::Storage(anyhow::anyhow!("disk")).code(),
            "STORAGE_ERROR"
        );
        let err = NotificationError::MaxRetriesExceeded {
            attempts: 4,
            last_error: Box::new(NotificationError::delivery("boom")),
        };
        assert_eq!(err.code(), "MAX_RETRIES_EXCEEDED");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_only_delivery_and_storage_are_retryable() {
        assert!(NotificationError::delivery("x").is_retryable());
        assert!(NotificationError::Storage(anyhow::anyhow!("x")).is_retryable());
        assert!(!NotificationError::Validation("x".into()).is_retryable());
        assert!(!NotificationError::Decryption("x".into()).is_retryable());
        assert!(!NotificationError::MaxRetriesExceeded {
            attempts: 1,
            last_error: Box::new(NotificationError::delivery("x")),
        }
        .is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(NotificationError::Validation("x".into()).http_status(), 400);
        assert_eq!(NotificationError::not_found("x").http_status(), 404);
        assert_eq!(NotificationError::AccessDenied("x".into()).http_status(), 403);
        assert_eq!(NotificationError::delivery("x").http_status(), 502);
        assert_eq!(NotificationError::Storage(anyhow::anyhow!("x")).http_status(), 500);
    }

    #[test]
    fn test_logging_reporter_classification() {
        let reporter = LoggingErrorReporter;
        let c = reporter.report(&NotificationError::AccessDenied("expired".into()));
        assert_eq!(c.severity, Severity::Critical);
        assert!(!c.retryable);

        let c = reporter.report(&NotificationError::delivery("timeout"));
        assert_eq!(c.severity, Severity::Medium);
        assert!(c.retryable);
    }
}
