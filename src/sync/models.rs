use serde::{Deserialize, Serialize};

use crate::notifications::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpKind {
    Create,
    Update,
    Delete,
}

impl SyncOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOpKind::Create => "create",
            SyncOpKind::Update => "update",
            SyncOpKind::Delete => "delete",
        }
    }
}

/// A local change waiting to be acknowledged by the sync target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub op: SyncOpKind,
    pub notification_id: String,
    /// State after the change; absent for deletes.
    pub snapshot: Option<Notification>,
    pub device_id: String,
    /// Unix ms of the change.
    pub timestamp: i64,
    pub sequence: u64,
}

/// How a remote operation that collides with an unacknowledged local one is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStrategy {
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "client")]
    Client,
    #[serde(rename = "lastModified")]
    LastModified,
}

impl ConflictStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "server" => Some(ConflictStrategy::Server),
            "client" => Some(ConflictStrategy::Client),
            "lastModified" | "last_modified" => Some(ConflictStrategy::LastModified),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Server => "server",
            ConflictStrategy::Client => "client",
            ConflictStrategy::LastModified => "lastModified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Record of one resolved conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub notification_id: String,
    pub local_timestamp: i64,
    pub remote_timestamp: i64,
    pub remote_device_id: String,
    pub strategy: ConflictStrategy,
    pub winner: ConflictWinner,
    pub resolved_at: i64,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub duration_ms: u64,
    pub pushed: usize,
    pub pulled: usize,
    pub failed: usize,
    pub conflicts_resolved: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        assert_eq!(
            ConflictStrategy::parse("lastModified"),
            Some(ConflictStrategy::LastModified)
        );
        assert_eq!(ConflictStrategy::parse("client"), Some(ConflictStrategy::Client));
        assert_eq!(ConflictStrategy::parse("newest"), None);
        assert_eq!(
            serde_json::to_string(&ConflictStrategy::LastModified).unwrap(),
            "\"lastModified\""
        );
    }

    #[test]
    fn test_operation_wire_format() {
        let op = SyncOperation {
            op: SyncOpKind::Delete,
            notification_id: "n1".into(),
            snapshot: None,
            device_id: "phone".into(),
            timestamp: 5,
            sequence: 1,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "delete");
        assert_eq!(json["notificationId"], "n1");
        assert_eq!(json["deviceId"], "phone");
    }
}
