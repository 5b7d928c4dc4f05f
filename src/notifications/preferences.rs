//! Per-user delivery preferences.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{Notification, NotificationType, Priority};
use crate::kv_store::{load_json, save_json, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    InApp,
    Push,
    Email,
}

/// Preference for a single notification type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypePreference {
    pub enabled: bool,
    pub channels: Vec<DeliveryChannel>,
    /// Notifications below this priority are not delivered.
    pub min_priority: Priority,
}

impl Default for TypePreference {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec![DeliveryChannel::InApp, DeliveryChannel::Push],
            min_priority: Priority::Low,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    /// Types absent from this map use `TypePreference::default()`.
    pub types: BTreeMap<NotificationType, TypePreference>,
}

impl NotificationPreferences {
    pub fn for_type(&self, notification_type: NotificationType) -> TypePreference {
        self.types
            .get(&notification_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn allows(&self, notification: &Notification) -> bool {
        let pref = self.for_type(notification.notification_type);
        pref.enabled && notification.priority >= pref.min_priority
    }

    pub fn allows_channel(
        &self,
        notification_type: NotificationType,
        channel: DeliveryChannel,
    ) -> bool {
        let pref = self.for_type(notification_type);
        pref.enabled && pref.channels.contains(&channel)
    }
}

fn preferences_key(user_id: &str) -> String {
    format!("preferences:{}", user_id)
}

/// Loads and saves preferences through the key-value store.
#[derive(Clone)]
pub struct PreferencesStore {
    kv: Arc<dyn KeyValueStore>,
}

impl PreferencesStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn get(&self, user_id: &str) -> Result<NotificationPreferences> {
        Ok(load_json(self.kv.as_ref(), &preferences_key(user_id))?.unwrap_or_default())
    }

    pub fn set(&self, user_id: &str, preferences: &NotificationPreferences) -> Result<()> {
        debug!("Saving preferences for user {}", user_id);
        save_json(self.kv.as_ref(), &preferences_key(user_id), preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::InMemoryKeyValueStore;

    #[test]
    fn test_defaults_allow_everything() {
        let prefs = NotificationPreferences::default();
        let n = Notification::new(NotificationType::PriceAlert, Priority::Low, "t", "m");
        assert!(prefs.allows(&n));
        assert!(prefs.allows_channel(NotificationType::PriceAlert, DeliveryChannel::Push));
        assert!(!prefs.allows_channel(NotificationType::PriceAlert, DeliveryChannel::Email));
    }

    #[test]
    fn test_min_priority_and_disabled_types() {
        let mut prefs = NotificationPreferences::default();
        prefs.types.insert(
            NotificationType::NftBid,
            TypePreference {
                min_priority: Priority::High,
                ..Default::default()
            },
        );
        prefs.types.insert(
            NotificationType::System,
            TypePreference {
                enabled: false,
                ..Default::default()
            },
        );

        let low_bid = Notification::new(NotificationType::NftBid, Priority::Medium, "t", "m");
        let urgent_bid = Notification::new(NotificationType::NftBid, Priority::Urgent, "t", "m");
        let system = Notification::new(NotificationType::System, Priority::Urgent, "t", "m");
        assert!(!prefs.allows(&low_bid));
        assert!(prefs.allows(&urgent_bid));
        assert!(!prefs.allows(&system));
    }

    #[test]
    fn test_store_round_trip_and_missing_user() {
        let store = PreferencesStore::new(Arc::new(InMemoryKeyValueStore::new()));
        assert_eq!(store.get("nobody").unwrap(), NotificationPreferences::default());

        let mut prefs = NotificationPreferences::default();
        prefs.types.insert(
            NotificationType::Security,
            TypePreference {
                channels: vec![DeliveryChannel::Email],
                ..Default::default()
            },
        );
        store.set("alice", &prefs).unwrap();
        assert_eq!(store.get("alice").unwrap(), prefs);
    }
}
