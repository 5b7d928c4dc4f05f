use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::{debug, info};

use super::models::{Group, GroupDefinition};
use crate::notifications::{Notification, NotificationError, NotificationResult};

/// Result of placing a notification into a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignment {
    pub group_id: String,
    /// Members pushed out by the size bound.
    pub evicted: Vec<String>,
}

/// Rule-based classification of notifications into named groups.
///
/// Groups are evaluated in creation order; the first match wins.
#[derive(Debug, Default)]
pub struct GroupManager {
    groups: Mutex<Vec<Group>>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_group(&self, definition: GroupDefinition) -> NotificationResult<Group> {
        if definition.id.trim().is_empty() {
            return Err(NotificationError::Validation("group id must not be empty".into()));
        }
        if definition.max_size == 0 {
            return Err(NotificationError::Validation(format!(
                "group {} must allow at least one member",
                definition.id
            )));
        }
        if let Some(rules) = &definition.rules {
            rules.validate()?;
        }
        let mut groups = self.groups.lock().unwrap();
        if groups.iter().any(|g| g.id == definition.id) {
            return Err(NotificationError::Validation(format!(
                "group {} already exists",
                definition.id
            )));
        }
        let group = Group {
            id: definition.id,
            name: definition.name,
            rules: definition.rules,
            max_size: definition.max_size,
            expiry_ms: definition.expiry_ms,
            members: VecDeque::new(),
        };
        info!("Created group {}", group.id);
        groups.push(group.clone());
        Ok(group)
    }

    pub fn remove_group(&self, group_id: &str) -> NotificationResult<Group> {
        let mut groups = self.groups.lock().unwrap();
        let index = groups
            .iter()
            .position(|g| g.id == group_id)
            .ok_or_else(|| NotificationError::not_found(format!("group {}", group_id)))?;
        Ok(groups.remove(index))
    }

    pub fn get_group(&self, group_id: &str) -> Option<Group> {
        self.groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
    }

    pub fn list_groups(&self) -> Vec<Group> {
        self.groups.lock().unwrap().clone()
    }

    pub fn exists(&self, group_id: &str) -> bool {
        self.groups.lock().unwrap().iter().any(|g| g.id == group_id)
    }

    /// First group whose rules match.
    pub fn classify(&self, notification: &Notification) -> Option<String> {
        self.groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.matches(notification))
            .map(|g| g.id.clone())
    }

    /// Place a notification in its explicit group if known, otherwise in the
    /// first matching group.
    pub fn assign(&self, notification: &Notification, now: i64) -> Option<GroupAssignment> {
        let mut groups = self.groups.lock().unwrap();
        let group = match &notification.group {
            Some(explicit) => groups.iter_mut().find(|g| &g.id == explicit),
            None => groups.iter_mut().find(|g| g.matches(notification)),
        }?;
        let evicted = group.push_member(&notification.id, now);
        if !evicted.is_empty() {
            debug!("Group {} evicted {} members", group.id, evicted.len());
        }
        Some(GroupAssignment {
            group_id: group.id.clone(),
            evicted,
        })
    }

    pub fn add_member(
        &self,
        group_id: &str,
        notification_id: &str,
        now: i64,
    ) -> NotificationResult<Vec<String>> {
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| NotificationError::not_found(format!("group {}", group_id)))?;
        Ok(group.push_member(notification_id, now))
    }

    /// Drop a notification from every group. Returns true if it was a member anywhere.
    pub fn remove_member(&self, notification_id: &str) -> bool {
        let mut removed = false;
        for group in self.groups.lock().unwrap().iter_mut() {
            let before = group.members.len();
            group.members.retain(|m| m.notification_id != notification_id);
            removed |= group.members.len() != before;
        }
        removed
    }

    pub fn members(&self, group_id: &str) -> Vec<String> {
        self.get_group(group_id)
            .map(|g| g.members.into_iter().map(|m| m.notification_id).collect())
            .unwrap_or_default()
    }

    /// Drop members older than their group's expiry. Returns the dropped ids.
    pub fn sweep_expired(&self, now: i64) -> Vec<String> {
        let mut dropped = Vec::new();
        for group in self.groups.lock().unwrap().iter_mut() {
            let Some(expiry_ms) = group.expiry_ms else {
                continue;
            };
            while let Some(front) = group.members.front() {
                if now - front.added_at <= expiry_ms {
                    break;
                }
                if let Some(member) = group.members.pop_front() {
                    dropped.push(member.notification_id);
                }
            }
        }
        if !dropped.is_empty() {
            info!("Group sweep dropped {} expired members", dropped.len());
        }
        dropped
    }
}
