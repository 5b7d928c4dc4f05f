//! Secondary indices over the primary notification map.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::notifications::{Notification, NotificationType, Priority};

/// Key of a single index bucket, used when comparing index contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Type(NotificationType),
    Priority(Priority),
    Read(bool),
    Group(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indices {
    pub by_type: HashMap<NotificationType, HashSet<String>>,
    pub by_priority: HashMap<Priority, HashSet<String>>,
    pub by_read: HashMap<bool, HashSet<String>>,
    pub by_group: HashMap<String, HashSet<String>>,
}

impl Indices {
    pub fn build<'a>(notifications: impl IntoIterator<Item = &'a Notification>) -> Self {
        let mut indices = Indices::default();
        for notification in notifications {
            indices.insert(notification);
        }
        indices
    }

    pub fn insert(&mut self, n: &Notification) {
        self.by_type
            .entry(n.notification_type)
            .or_default()
            .insert(n.id.clone());
        self.by_priority
            .entry(n.priority)
            .or_default()
            .insert(n.id.clone());
        self.by_read.entry(n.read).or_default().insert(n.id.clone());
        if let Some(group) = &n.group {
            self.by_group
                .entry(group.clone())
                .or_default()
                .insert(n.id.clone());
        }
    }

    pub fn remove(&mut self, n: &Notification) {
        remove_from(&mut self.by_type, &n.notification_type, &n.id);
        remove_from(&mut self.by_priority, &n.priority, &n.id);
        remove_from(&mut self.by_read, &n.read, &n.id);
        if let Some(group) = &n.group {
            remove_from(&mut self.by_group, group, &n.id);
        }
    }

    /// Replace the entries of `old` with those of `new` (same id).
    pub fn replace(&mut self, old: &Notification, new: &Notification) {
        self.remove(old);
        self.insert(new);
    }

    pub fn ids_for_type(&self, t: NotificationType) -> Option<&HashSet<String>> {
        self.by_type.get(&t)
    }

    pub fn ids_for_group(&self, group: &str) -> Option<&HashSet<String>> {
        self.by_group.get(group)
    }

    pub fn ids_for_read(&self, read: bool) -> Option<&HashSet<String>> {
        self.by_read.get(&read)
    }

    /// Flattened `(bucket, id)` pairs.
    pub fn entries(&self) -> BTreeSet<(IndexKey, String)> {
        let mut out = BTreeSet::new();
        for (t, ids) in &self.by_type {
            out.extend(ids.iter().map(|id| (IndexKey::Type(*t), id.clone())));
        }
        for (p, ids) in &self.by_priority {
            out.extend(ids.iter().map(|id| (IndexKey::Priority(*p), id.clone())));
        }
        for (r, ids) in &self.by_read {
            out.extend(ids.iter().map(|id| (IndexKey::Read(*r), id.clone())));
        }
        for (g, ids) in &self.by_group {
            out.extend(ids.iter().map(|id| (IndexKey::Group(g.clone()), id.clone())));
        }
        out
    }

    /// Number of `(bucket, id)` pairs present in one side but not the other.
    pub fn difference_count(&self, other: &Indices) -> usize {
        let mine = self.entries();
        let theirs = other.entries();
        mine.symmetric_difference(&theirs).count()
    }
}

fn remove_from<K: std::hash::Hash + Eq + Clone>(
    index: &mut HashMap<K, HashSet<String>>,
    key: &K,
    id: &str,
) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
