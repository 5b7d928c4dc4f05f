use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::indices::Indices;
use super::query_cache::QueryCache;
use super::transaction::Transaction;
use crate::config::StoreSettings;
use crate::kv_store::{load_json, save_json, KeyValueStore};
use crate::notifications::{
    Notification, NotificationError, NotificationFilter, NotificationPatch, NotificationResult,
    NotificationType, Priority, QueryResult,
};
use crate::server::metrics;

pub const NOTIFICATION_KEY_PREFIX: &str = "notifications:";

fn notification_key(id: &str) -> String {
    format!("{}{}", NOTIFICATION_KEY_PREFIX, id)
}

/// A single buffered mutation.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Add(Notification),
    Update(String, NotificationPatch),
    Remove(String),
}

/// Outcome of an applied mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Added(Notification),
    Updated {
        before: Notification,
        after: Notification,
    },
    Removed(Notification),
}

impl StoreChange {
    pub fn id(&self) -> &str {
        match self {
            StoreChange::Added(n) | StoreChange::Removed(n) => &n.id,
            StoreChange::Updated { after, .. } => &after.id,
        }
    }

    /// The record as it is after the change, if it still exists.
    pub fn current(&self) -> Option<&Notification> {
        match self {
            StoreChange::Added(n) => Some(n),
            StoreChange::Updated { after, .. } => Some(after),
            StoreChange::Removed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub unread: usize,
    pub by_type: BTreeMap<NotificationType, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    notifications: HashMap<String, Notification>,
    indices: Indices,
}

impl StoreState {
    fn apply(&mut self, op: StoreOp) -> NotificationResult<StoreChange> {
        match op {
            StoreOp::Add(notification) => {
                notification.validate()?;
                if self.notifications.contains_key(&notification.id) {
                    return Err(NotificationError::Validation(format!(
                        "notification {} already exists",
                        notification.id
                    )));
                }
                self.indices.insert(&notification);
                self.notifications
                    .insert(notification.id.clone(), notification.clone());
                Ok(StoreChange::Added(notification))
            }
            StoreOp::Update(id, patch) => {
                let before = self
                    .notifications
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| NotificationError::not_found(&id))?;
                let mut after = before.clone();
                after.apply_patch(&patch)?;
                self.indices.replace(&before, &after);
                self.notifications.insert(id, after.clone());
                Ok(StoreChange::Updated { before, after })
            }
            StoreOp::Remove(id) => {
                let removed = self
                    .notifications
                    .remove(&id)
                    .ok_or_else(|| NotificationError::not_found(&id))?;
                self.indices.remove(&removed);
                Ok(StoreChange::Removed(removed))
            }
        }
    }

    fn candidate_ids(&self, filter: &NotificationFilter) -> Vec<String> {
        if !filter.types.is_empty() {
            let mut ids: HashSet<&String> = HashSet::new();
            for t in &filter.types {
                if let Some(bucket) = self.indices.ids_for_type(*t) {
                    ids.extend(bucket.iter());
                }
            }
            return ids.into_iter().cloned().collect();
        }
        if let Some(group) = &filter.group {
            return self
                .indices
                .ids_for_group(group)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default();
        }
        if let Some(read) = filter.read {
            return self
                .indices
                .ids_for_read(read)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default();
        }
        self.notifications.keys().cloned().collect()
    }

    fn query(&self, filter: &NotificationFilter) -> QueryResult {
        let mut matches: Vec<&Notification> = self
            .candidate_ids(filter)
            .iter()
            .filter_map(|id| self.notifications.get(id))
            .filter(|n| filter.matches(n))
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));

        let total = matches.len();
        let page = matches
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        QueryResult {
            notifications: page,
            total,
        }
    }
}

/// Indexed in-memory notification store with write-through persistence.
pub struct NotificationStore {
    state: Mutex<StoreState>,
    cache: Mutex<QueryCache>,
    kv: Option<Arc<dyn KeyValueStore>>,
}

impl NotificationStore {
    pub fn new(settings: &StoreSettings, kv: Option<Arc<dyn KeyValueStore>>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            cache: Mutex::new(QueryCache::new(
                settings.query_cache_size,
                Duration::from_millis(settings.query_cache_ttl_ms),
            )),
            kv,
        }
    }

    /// Store without persistence.
    pub fn in_memory() -> Self {
        Self::new(&StoreSettings::default(), None)
    }

    /// Rebuild the in-memory state from the key-value store.
    ///
    /// Unreadable records are skipped and logged. Returns the number loaded.
    pub fn load(&self) -> anyhow::Result<usize> {
        let Some(kv) = &self.kv else {
            return Ok(0);
        };
        let mut loaded = StoreState::default();
        for key in kv.keys(NOTIFICATION_KEY_PREFIX)? {
            match load_json::<Notification>(kv.as_ref(), &key) {
                Ok(Some(notification)) => {
                    loaded.indices.insert(&notification);
                    loaded
                        .notifications
                        .insert(notification.id.clone(), notification);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record {}: {:#}", key, e),
            }
        }
        let count = loaded.notifications.len();
        *self.state.lock().unwrap() = loaded;
        self.cache.lock().unwrap().clear();
        metrics::set_stored_notifications(count);
        info!("Loaded {} notifications from storage", count);
        Ok(count)
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Apply operations atomically. The first error leaves the store untouched.
    pub(crate) fn apply_ops(&self, ops: Vec<StoreOp>) -> NotificationResult<Vec<StoreChange>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let changes = {
            let mut state = self.state.lock().unwrap();
            let mut staged = if ops.len() == 1 {
                None
            } else {
                Some(state.clone())
            };
            let target = staged.as_mut().unwrap_or(&mut *state);
            let mut changes = Vec::with_capacity(ops.len());
            for op in ops {
                changes.push(target.apply(op)?);
            }
            if let Some(staged) = staged {
                *state = staged;
            }
            self.cache.lock().unwrap().clear();
            metrics::set_stored_notifications(state.notifications.len());
            changes
        };
        self.persist(&changes);
        Ok(changes)
    }

    fn persist(&self, changes: &[StoreChange]) {
        let Some(kv) = &self.kv else {
            return;
        };
        for change in changes {
            let key = notification_key(change.id());
            let result = match change.current() {
                Some(notification) => save_json(kv.as_ref(), &key, notification),
                None => kv.delete(&key).map(|_| ()),
            };
            if let Err(e) = result {
                warn!("Failed to persist notification {}: {:#}", change.id(), e);
            }
        }
    }

    pub fn add(&self, notification: Notification) -> NotificationResult<Notification> {
        let id = notification.id.clone();
        let mut changes = self.apply_ops(vec![StoreOp::Add(notification)])?;
        debug!("Added notification {}", id);
        match changes.pop() {
            Some(StoreChange::Added(n)) => Ok(n),
            _ => Err(NotificationError::not_found(id)),
        }
    }

    pub fn update(&self, id: &str, patch: NotificationPatch) -> NotificationResult<Notification> {
        let mut changes = self.apply_ops(vec![StoreOp::Update(id.to_string(), patch)])?;
        match changes.pop() {
            Some(StoreChange::Updated { after, .. }) => Ok(after),
            _ => Err(NotificationError::not_found(id)),
        }
    }

    pub fn remove(&self, id: &str) -> NotificationResult<Notification> {
        let mut changes = self.apply_ops(vec![StoreOp::Remove(id.to_string())])?;
        match changes.pop() {
            Some(StoreChange::Removed(n)) => Ok(n),
            _ => Err(NotificationError::not_found(id)),
        }
    }

    pub fn add_batch(&self, notifications: Vec<Notification>) -> NotificationResult<usize> {
        let changes = self.apply_ops(notifications.into_iter().map(StoreOp::Add).collect())?;
        Ok(changes.len())
    }

    pub fn update_batch(
        &self,
        updates: Vec<(String, NotificationPatch)>,
    ) -> NotificationResult<Vec<Notification>> {
        let ops = updates
            .into_iter()
            .map(|(id, patch)| StoreOp::Update(id, patch))
            .collect();
        Ok(self
            .apply_ops(ops)?
            .into_iter()
            .filter_map(|c| c.current().cloned())
            .collect())
    }

    pub fn remove_batch(&self, ids: &[String]) -> NotificationResult<Vec<Notification>> {
        let ops = ids.iter().cloned().map(StoreOp::Remove).collect();
        Ok(self
            .apply_ops(ops)?
            .into_iter()
            .filter_map(|c| match c {
                StoreChange::Removed(n) => Some(n),
                _ => None,
            })
            .collect())
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.state.lock().unwrap().notifications.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().unwrap().notifications.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Notification> {
        self.query(&NotificationFilter::default()).notifications
    }

    pub fn query(&self, filter: &NotificationFilter) -> QueryResult {
        let state = self.state.lock().unwrap();
        let mut cache = self.cache.lock().unwrap();
        if let Some(hit) = cache.get(filter) {
            return hit;
        }
        let result = state.query(filter);
        cache.put(filter.clone(), result.clone());
        result
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Mark every unread notification (optionally of one user) as read.
    pub fn mark_all_read(&self, user_id: Option<&str>) -> NotificationResult<Vec<Notification>> {
        let ids: Vec<String> = {
            let state = self.state.lock().unwrap();
            state
                .indices
                .ids_for_read(false)
                .map(|ids| {
                    ids.iter()
                        .filter(|id| {
                            user_id.is_none()
                                || state
                                    .notifications
                                    .get(*id)
                                    .and_then(|n| n.user_id.as_deref())
                                    == user_id
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        self.update_batch(
            ids.into_iter()
                .map(|id| (id, NotificationPatch::mark_read(true)))
                .collect(),
        )
    }

    pub fn unread_count(&self, user_id: Option<&str>) -> usize {
        let state = self.state.lock().unwrap();
        let Some(unread) = state.indices.ids_for_read(false) else {
            return 0;
        };
        match user_id {
            None => unread.len(),
            Some(user) => unread
                .iter()
                .filter_map(|id| state.notifications.get(id))
                .filter(|n| n.user_id.as_deref() == Some(user))
                .count(),
        }
    }

    /// Delete notifications whose expiry is at or before `now`.
    pub fn remove_expired(&self, now: i64) -> NotificationResult<Vec<Notification>> {
        let expired: Vec<String> = {
            let state = self.state.lock().unwrap();
            state
                .notifications
                .values()
                .filter(|n| n.is_expired(now))
                .map(|n| n.id.clone())
                .collect()
        };
        if expired.is_empty() {
            return Ok(Vec::new());
        }
        let removed = self.remove_batch(&expired)?;
        info!("Removed {} expired notifications", removed.len());
        Ok(removed)
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock().unwrap();
        let mut stats = StoreStats {
            total: state.notifications.len(),
            ..Default::default()
        };
        for n in state.notifications.values() {
            if !n.read {
                stats.unread += 1;
            }
            *stats.by_type.entry(n.notification_type).or_default() += 1;
            *stats.by_priority.entry(n.priority).or_default() += 1;
        }
        stats
    }

    /// True iff the secondary indices agree with the primary map.
    pub fn validate_indices(&self) -> bool {
        let state = self.state.lock().unwrap();
        let expected = Indices::build(state.notifications.values());
        state.indices.difference_count(&expected) == 0
    }

    /// Rebuild the indices from the primary map. Returns the number of corrected entries.
    pub fn repair_indices(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let expected = Indices::build(state.notifications.values());
        let corrected = state.indices.difference_count(&expected);
        if corrected > 0 {
            warn!("Repaired {} inconsistent index entries", corrected);
            state.indices = expected;
            self.cache.lock().unwrap().clear();
        }
        corrected
    }

    #[cfg(test)]
    fn corrupt_indices_for_test(&self) {
        let mut state = self.state.lock().unwrap();
        state.indices.by_type.clear();
        state
            .indices
            .by_read
            .entry(true)
            .or_default()
            .insert("ghost".to_string());
    }
}
