use std::collections::VecDeque;

use crate::notifications::{Notification, Priority};

/// A notification waiting in a priority tier.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub notification: Notification,
    /// Failed processing attempts so far.
    pub retries: u32,
    pub enqueued_at: i64,
}

impl QueuedItem {
    pub fn new(notification: Notification, enqueued_at: i64) -> Self {
        Self {
            notification,
            retries: 0,
            enqueued_at,
        }
    }

    pub fn priority(&self) -> Priority {
        self.notification.priority
    }
}

/// One FIFO per priority tier.
#[derive(Debug, Default)]
pub struct TierQueues {
    urgent: VecDeque<QueuedItem>,
    high: VecDeque<QueuedItem>,
    medium: VecDeque<QueuedItem>,
    low: VecDeque<QueuedItem>,
}

impl TierQueues {
    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<QueuedItem> {
        match priority {
            Priority::Urgent => &mut self.urgent,
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    fn tier(&self, priority: Priority) -> &VecDeque<QueuedItem> {
        match priority {
            Priority::Urgent => &self.urgent,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    /// Returns the new length of the item's tier.
    pub fn push(&mut self, item: QueuedItem) -> usize {
        let queue = self.tier_mut(item.priority());
        queue.push_back(item);
        queue.len()
    }

    /// Take everything currently queued in a tier, oldest first.
    pub fn take_all(&mut self, priority: Priority) -> Vec<QueuedItem> {
        self.tier_mut(priority).drain(..).collect()
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.tier(priority).len()
    }

    pub fn total(&self) -> usize {
        Priority::BY_URGENCY.iter().map(|p| self.len(*p)).sum()
    }

    pub fn ids(&self, priority: Priority) -> Vec<String> {
        self.tier(priority)
            .iter()
            .map(|item| item.notification.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationType;

    fn item(title: &str, priority: Priority) -> QueuedItem {
        QueuedItem::new(
            Notification::new(NotificationType::System, priority, title, "m"),
            0,
        )
    }

    #[test]
    fn test_tiers_are_independent_fifos() {
        let mut queues = TierQueues::default();
        queues.push(item("a", Priority::Low));
        queues.push(item("b", Priority::Urgent));
        assert_eq!(queues.push(item("c", Priority::Low)), 2);

        assert_eq!(queues.total(), 3);
        let low: Vec<String> = queues
            .take_all(Priority::Low)
            .into_iter()
            .map(|i| i.notification.title)
            .collect();
        assert_eq!(low, vec!["a", "c"]);
        assert_eq!(queues.len(Priority::Low), 0);
        assert_eq!(queues.len(Priority::Urgent), 1);
    }
}
