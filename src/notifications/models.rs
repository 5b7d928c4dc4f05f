//! Notification data models
//!
//! Defines the notification record, its closed type set, the ordered priority
//! enumeration, mutation patches and query filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::NotificationError;

/// Notification type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    System,
    NftListed,
    NftSold,
    NftBid,
    TokenTransfer,
    PriceAlert,
    Security,
    Custom,
}

impl NotificationType {
    pub const ALL: [NotificationType; 8] = [
        NotificationType::System,
        NotificationType::NftListed,
        NotificationType::NftSold,
        NotificationType::NftBid,
        NotificationType::TokenTransfer,
        NotificationType::PriceAlert,
        NotificationType::Security,
        NotificationType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::System => "SYSTEM",
            NotificationType::NftListed => "NFT_LISTED",
            NotificationType::NftSold => "NFT_SOLD",
            NotificationType::NftBid => "NFT_BID",
            NotificationType::TokenTransfer => "TOKEN_TRANSFER",
            NotificationType::PriceAlert => "PRICE_ALERT",
            NotificationType::Security => "SECURITY",
            NotificationType::Custom => "CUSTOM",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SYSTEM" => Some(NotificationType::System),
            "NFT_LISTED" => Some(NotificationType::NftListed),
            "NFT_SOLD" => Some(NotificationType::NftSold),
            "NFT_BID" => Some(NotificationType::NftBid),
            "TOKEN_TRANSFER" => Some(NotificationType::TokenTransfer),
            "PRICE_ALERT" => Some(NotificationType::PriceAlert),
            "SECURITY" => Some(NotificationType::Security),
            "CUSTOM" => Some(NotificationType::Custom),
            _ => None,
        }
    }

    pub fn is_nft(&self) -> bool {
        matches!(
            self,
            NotificationType::NftListed | NotificationType::NftSold | NotificationType::NftBid
        )
    }
}

/// Delivery priority.
///
/// Declaration order is the ordering: `Low < Medium < High < Urgent`.
/// `rank()` is the single source of truth for comparisons outside `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Tiers in delivery order, most urgent first.
    pub const BY_URGENCY: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Higher rank is delivered first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Priority::Low),
            1 => Some(Priority::Medium),
            2 => Some(Priority::High),
            3 => Some(Priority::Urgent),
            _ => None,
        }
    }

    /// One tier up, saturating at `Urgent`.
    pub fn promote(&self) -> Self {
        Priority::from_rank(self.rank() + 1).unwrap_or(Priority::Urgent)
    }

    /// One tier down, saturating at `Low`.
    pub fn demote(&self) -> Self {
        match self.rank() {
            0 => Priority::Low,
            r => Priority::from_rank(r - 1).unwrap_or(Priority::Low),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Some(Priority::Low),
            "MEDIUM" => Some(Priority::Medium),
            "HIGH" => Some(Priority::High),
            "URGENT" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// An action attached to a notification (e.g. "View listing").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    /// Creation instant, Unix milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Notification {
    /// Create an unread notification with a fresh id and the current timestamp.
    pub fn new(
        notification_type: NotificationType,
        priority: Priority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type,
            priority,
            title: title.into(),
            message: message.into(),
            timestamp: now_millis(),
            read: false,
            group: None,
            expires_at: None,
            data: None,
            actions: Vec::new(),
            user_id: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Check the fields every stored notification must carry.
    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.id.trim().is_empty() {
            return Err(NotificationError::Validation("id must not be empty".into()));
        }
        if self.title.trim().is_empty() {
            return Err(NotificationError::Validation(format!(
                "notification {} has an empty title",
                self.id
            )));
        }
        if self.timestamp <= 0 {
            return Err(NotificationError::Validation(format!(
                "notification {} has an invalid timestamp {}",
                self.id, self.timestamp
            )));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at < self.timestamp {
                return Err(NotificationError::Validation(format!(
                    "notification {} expires before it was created",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Apply a patch, rejecting changes to immutable fields.
    pub fn apply_patch(&mut self, patch: &NotificationPatch) -> Result<(), NotificationError> {
        if let Some(priority) = patch.priority {
            if priority != self.priority {
                return Err(NotificationError::Validation(format!(
                    "priority of {} is immutable",
                    self.id
                )));
            }
        }
        if let Some(notification_type) = patch.notification_type {
            if notification_type != self.notification_type {
                return Err(NotificationError::Validation(format!(
                    "type of {} is immutable",
                    self.id
                )));
            }
        }
        if let Some(read) = patch.read {
            self.read = read;
        }
        if let Some(group) = &patch.group {
            self.group = group.clone();
        }
        if let Some(data) = &patch.data {
            self.data = Some(data.clone());
        }
        if let Some(annotations) = &patch.annotations {
            for (key, value) in annotations {
                self.annotations.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Partial update of a notification.
///
/// `priority` and `notification_type` are accepted only when they match the
/// stored values, so that full-record updates coming from clients can be
/// applied as patches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPatch {
    pub read: Option<bool>,
    pub group: Option<Option<String>>,
    pub data: Option<serde_json::Value>,
    pub annotations: Option<BTreeMap<String, String>>,
    pub priority: Option<Priority>,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
}

impl NotificationPatch {
    pub fn mark_read(read: bool) -> Self {
        Self {
            read: Some(read),
            ..Default::default()
        }
    }

    pub fn set_group(group: Option<String>) -> Self {
        Self {
            group: Some(group),
            ..Default::default()
        }
    }
}

/// Store query filter. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationFilter {
    pub types: Vec<NotificationType>,
    pub priorities: Vec<Priority>,
    pub read: Option<bool>,
    pub group: Option<String>,
    pub user_id: Option<String>,
    /// Inclusive lower bound, Unix ms.
    pub from: Option<i64>,
    /// Inclusive upper bound, Unix ms.
    pub to: Option<i64>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl NotificationFilter {
    pub fn by_type(notification_type: NotificationType) -> Self {
        Self {
            types: vec![notification_type],
            ..Default::default()
        }
    }

    pub fn unread() -> Self {
        Self {
            read: Some(false),
            ..Default::default()
        }
    }

    /// Whether a notification passes every predicate (pagination excluded).
    pub fn matches(&self, notification: &Notification) -> bool {
        if !self.types.is_empty() && !self.types.contains(&notification.notification_type) {
            return false;
        }
        if !self.priorities.is_empty() && !self.priorities.contains(&notification.priority) {
            return false;
        }
        if let Some(read) = self.read {
            if notification.read != read {
                return false;
            }
        }
        if let Some(group) = &self.group {
            if notification.group.as_ref() != Some(group) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if notification.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if notification.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if notification.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// A page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub notifications: Vec<Notification>,
    /// Number of matches before pagination.
    pub total: usize,
}

/// Options accepted by `notify`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyOptions {
    pub priority: Option<Priority>,
    pub group: Option<String>,
    pub expires_at: Option<i64>,
    pub data: Option<serde_json::Value>,
    pub actions: Vec<NotificationAction>,
    pub user_id: Option<String>,
}

impl NotifyOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_serialization() {
        let serialized = serde_json::to_string(&NotificationType::NftListed).unwrap();
        assert_eq!(serialized, "\"NFT_LISTED\"");

        let deserialized: NotificationType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, NotificationType::NftListed);
    }

    #[test]
    fn test_notification_type_from_str_is_case_insensitive() {
        assert_eq!(
            NotificationType::from_str("token_transfer"),
            Some(NotificationType::TokenTransfer)
        );
        assert_eq!(NotificationType::from_str("nope"), None);
        for t in NotificationType::ALL {
            assert_eq!(NotificationType::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(
            Priority::BY_URGENCY.map(|p| p.rank()),
            [3, 2, 1, 0]
        );
    }

    #[test]
    fn test_priority_promote_and_demote_saturate() {
        assert_eq!(Priority::Low.promote(), Priority::Medium);
        assert_eq!(Priority::Urgent.promote(), Priority::Urgent);
        assert_eq!(Priority::High.demote(), Priority::Medium);
        assert_eq!(Priority::Low.demote(), Priority::Low);
    }

    #[test]
    fn test_notification_serialization_uses_type_key() {
        let notification = Notification::new(
            NotificationType::NftListed,
            Priority::High,
            "Listed",
            "Your NFT is listed",
        )
        .with_group("nft");

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "NFT_LISTED");
        assert_eq!(json["priority"], "HIGH");
        assert_eq!(json["group"], "nft");
        assert_eq!(json["read"], false);
        assert!(json.get("expires_at").is_none());

        let parsed: Notification = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, notification);
    }

    #[test]
    fn test_validate_rejects_empty_title() {
        let notification = Notification::new(NotificationType::System, Priority::Low, "  ", "m");
        assert!(matches!(
            notification.validate(),
            Err(NotificationError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_expiry_before_creation() {
        let notification = Notification::new(NotificationType::System, Priority::Low, "t", "m")
            .with_timestamp(1_000)
            .with_expiry(500);
        assert!(notification.validate().is_err());
    }

    #[test]
    fn test_apply_patch_rejects_priority_change() {
        let mut notification =
            Notification::new(NotificationType::System, Priority::Low, "t", "m");
        let patch = NotificationPatch {
            priority: Some(Priority::Urgent),
            ..Default::default()
        };
        assert!(notification.apply_patch(&patch).is_err());
        assert_eq!(notification.priority, Priority::Low);
    }

    #[test]
    fn test_apply_patch_allows_same_priority_and_updates_read() {
        let mut notification =
            Notification::new(NotificationType::System, Priority::Low, "t", "m");
        let patch = NotificationPatch {
            priority: Some(Priority::Low),
            read: Some(true),
            annotations: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..Default::default()
        };
        notification.apply_patch(&patch).unwrap();
        assert!(notification.read);
        assert_eq!(notification.annotations.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn test_filter_matches_date_range_inclusive() {
        let notification = Notification::new(NotificationType::System, Priority::Low, "t", "m")
            .with_timestamp(1_000);
        let filter = NotificationFilter {
            from: Some(1_000),
            to: Some(1_000),
            ..Default::default()
        };
        assert!(filter.matches(&notification));

        let filter = NotificationFilter {
            from: Some(1_001),
            ..Default::default()
        };
        assert!(!filter.matches(&notification));
    }
}
