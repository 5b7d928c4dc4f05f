use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::notifications::{Notification, NotificationType, Priority};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedNotification {
    pub archive_id: String,
    pub notification: Notification,
    /// Unix ms.
    pub archived_at: i64,
    pub collection: String,
    pub tags: Vec<String>,
    /// Serialized size of the record when it left the store.
    pub original_size: usize,
}

/// Archive search. Empty lists match everything; `text` requires every token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArchiveQuery {
    /// Inclusive bounds on the notification timestamp.
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub types: Vec<NotificationType>,
    pub priorities: Vec<Priority>,
    pub groups: Vec<String>,
    pub collection: Option<String>,
    pub text: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ArchiveQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &ArchivedNotification) -> bool {
        let n = &entry.notification;
        if self.from.map(|from| n.timestamp < from).unwrap_or(false) {
            return false;
        }
        if self.to.map(|to| n.timestamp > to).unwrap_or(false) {
            return false;
        }
        if !self.types.is_empty() && !self.types.contains(&n.notification_type) {
            return false;
        }
        if !self.priorities.is_empty() && !self.priorities.contains(&n.priority) {
            return false;
        }
        if !self.groups.is_empty()
            && !n
                .group
                .as_ref()
                .map(|g| self.groups.contains(g))
                .unwrap_or(false)
        {
            return false;
        }
        if let Some(collection) = &self.collection {
            if &entry.collection != collection {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStats {
    pub total: usize,
    pub total_bytes: usize,
    pub by_collection: BTreeMap<String, usize>,
    pub oldest_archived_at: Option<i64>,
    pub newest_archived_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivePage {
    pub entries: Vec<ArchivedNotification>,
    pub total: usize,
}
