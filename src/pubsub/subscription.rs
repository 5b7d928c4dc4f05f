use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::notifications::{Notification, NotificationError, NotificationType, Priority};

/// Receives notifications on behalf of a subscriber.
#[async_trait]
pub trait DeliveryCallback: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Forwards every delivered notification into a channel.
pub struct ChannelCallback {
    sender: mpsc::Sender<Notification>,
}

impl ChannelCallback {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Callback plus the receiving end of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl DeliveryCallback for ChannelCallback {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sender
            .send(notification.clone())
            .await
            .map_err(|_| NotificationError::delivery("subscriber channel closed"))
    }
}

/// Subscription filter. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    pub types: Vec<NotificationType>,
    pub priorities: Vec<Priority>,
    pub groups: Vec<String>,
    /// Restrict to notifications addressed to this user.
    pub user_id: Option<String>,
}

impl SubscriptionFilter {
    pub fn types(types: impl IntoIterator<Item = NotificationType>) -> Self {
        Self {
            types: types.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, n: &Notification) -> bool {
        (self.types.is_empty() || self.types.contains(&n.notification_type))
            && (self.priorities.is_empty() || self.priorities.contains(&n.priority))
            && (self.groups.is_empty()
                || n.group.as_ref().map(|g| self.groups.contains(g)).unwrap_or(false))
            && (self.user_id.is_none() || n.user_id == self.user_id)
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub filter: Option<SubscriptionFilter>,
    pub callback: Arc<dyn DeliveryCallback>,
}

impl Subscription {
    pub fn matches(&self, n: &Notification) -> bool {
        self.filter.as_ref().map(|f| f.matches(n)).unwrap_or(true)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish()
    }
}
