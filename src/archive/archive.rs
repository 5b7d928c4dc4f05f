use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{debug, info, warn};

use super::models::{ArchivePage, ArchiveQuery, ArchiveStats, ArchivedNotification};
use super::token_index::TokenIndex;
use crate::config::ArchiveSettings;
use crate::kv_store::{load_json, save_json, KeyValueStore};
use crate::notifications::{Notification, NotificationError, NotificationResult};

pub const ARCHIVE_KEY_PREFIX: &str = "archive:";
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

fn archive_key(archive_id: &str) -> String {
    format!("{}{}", ARCHIVE_KEY_PREFIX, archive_id)
}

#[derive(Default)]
struct ArchiveState {
    entries: HashMap<String, ArchivedNotification>,
    tokens: TokenIndex,
}

impl ArchiveState {
    fn insert(&mut self, entry: ArchivedNotification) {
        self.tokens.insert(&entry);
        self.entries.insert(entry.archive_id.clone(), entry);
    }

    fn remove(&mut self, archive_id: &str) -> Option<ArchivedNotification> {
        let entry = self.entries.remove(archive_id)?;
        self.tokens.remove(&entry);
        Some(entry)
    }
}

/// Long-term storage of retired notifications.
pub struct Archive {
    settings: ArchiveSettings,
    state: Mutex<ArchiveState>,
    kv: Option<Arc<dyn KeyValueStore>>,
}

impl Archive {
    pub fn new(settings: ArchiveSettings, kv: Option<Arc<dyn KeyValueStore>>) -> Self {
        Self {
            settings,
            state: Mutex::new(ArchiveState::default()),
            kv,
        }
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// Rebuild entries and the token index from the key-value store.
    pub fn load(&self) -> Result<usize> {
        let Some(kv) = &self.kv else {
            return Ok(0);
        };
        let mut state = self.state.lock().unwrap();
        for key in kv.keys(ARCHIVE_KEY_PREFIX)? {
            match load_json::<ArchivedNotification>(kv.as_ref(), &key) {
                Ok(Some(entry)) => state.insert(entry),
                Ok(None) => {}
                Err(err) => warn!("Skipping archive entry {}: {:#}", key, err),
            }
        }
        info!("Loaded {} archived notifications", state.entries.len());
        Ok(state.entries.len())
    }

    pub fn archive(
        &self,
        notifications: Vec<Notification>,
        collection: &str,
        now: i64,
    ) -> Vec<ArchivedNotification> {
        let archived: Vec<ArchivedNotification> = notifications
            .into_iter()
            .map(|notification| {
                let mut tags = vec![
                    notification.notification_type.as_str().to_string(),
                    notification.priority.as_str().to_string(),
                ];
                if let Some(group) = &notification.group {
                    tags.push(group.clone());
                }
                ArchivedNotification {
                    archive_id: uuid::Uuid::new_v4().to_string(),
                    original_size: serde_json::to_vec(&notification)
                        .map(|bytes| bytes.len())
                        .unwrap_or(0),
                    notification,
                    archived_at: now,
                    collection: collection.to_string(),
                    tags,
                }
            })
            .collect();

        {
            let mut state = self.state.lock().unwrap();
            for entry in &archived {
                state.insert(entry.clone());
            }
        }
        for entry in &archived {
            self.persist(entry);
        }
        debug!("Archived {} notifications into {}", archived.len(), collection);
        archived
    }

    fn persist(&self, entry: &ArchivedNotification) {
        if let Some(kv) = &self.kv {
            if let Err(err) = save_json(kv.as_ref(), &archive_key(&entry.archive_id), entry) {
                warn!("Failed to persist archive entry {}: {:#}", entry.archive_id, err);
            }
        }
    }

    fn forget(&self, archive_id: &str) {
        if let Some(kv) = &self.kv {
            if let Err(err) = kv.delete(&archive_key(archive_id)) {
                warn!("Failed to delete archive entry {}: {:#}", archive_id, err);
            }
        }
    }

    pub fn get(&self, archive_id: &str) -> Option<ArchivedNotification> {
        self.state.lock().unwrap().entries.get(archive_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest archived first, ties by archive id.
    pub fn query(&self, query: &ArchiveQuery) -> ArchivePage {
        let state = self.state.lock().unwrap();
        let text_hits = query
            .text
            .as_deref()
            .and_then(|text| state.tokens.search(text));

        let mut matches: Vec<&ArchivedNotification> = state
            .entries
            .values()
            .filter(|entry| {
                text_hits
                    .as_ref()
                    .map(|hits| hits.contains(&entry.archive_id))
                    .unwrap_or(true)
            })
            .filter(|entry| query.matches(entry))
            .collect();
        matches.sort_by(|a, b| {
            b.archived_at
                .cmp(&a.archived_at)
                .then_with(|| a.archive_id.cmp(&b.archive_id))
        });

        let total = matches.len();
        let entries = matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        ArchivePage { entries, total }
    }

    /// Drop entries archived more than `retention_days` ago.
    pub fn cleanup(&self, now: i64) -> usize {
        let cutoff = now - self.settings.retention_days as i64 * DAY_MS;
        let removed: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let expired: Vec<String> = state
                .entries
                .values()
                .filter(|entry| entry.archived_at < cutoff)
                .map(|entry| entry.archive_id.clone())
                .collect();
            for id in &expired {
                state.remove(id);
            }
            expired
        };
        for id in &removed {
            self.forget(id);
        }
        if !removed.is_empty() {
            info!("Archive retention removed {} entries", removed.len());
        }
        removed.len()
    }

    /// Drop the oldest notifications until at most `max_entries` remain.
    pub fn enforce_storage_limit(&self) -> usize {
        let removed: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let excess = state.entries.len().saturating_sub(self.settings.max_entries);
            if excess == 0 {
                return 0;
            }
            let mut by_age: Vec<(i64, String)> = state
                .entries
                .values()
                .map(|entry| (entry.notification.timestamp, entry.archive_id.clone()))
                .collect();
            by_age.sort();
            let evicted: Vec<String> = by_age.into_iter().take(excess).map(|(_, id)| id).collect();
            for id in &evicted {
                state.remove(id);
            }
            evicted
        };
        for id in &removed {
            self.forget(id);
        }
        info!("Archive storage limit evicted {} entries", removed.len());
        removed.len()
    }

    /// Take an entry out of the archive and hand back its notification.
    pub fn restore(&self, archive_id: &str) -> NotificationResult<Notification> {
        let entry = self
            .state
            .lock()
            .unwrap()
            .remove(archive_id)
            .ok_or_else(|| NotificationError::not_found(format!("archive entry {}", archive_id)))?;
        self.forget(archive_id);
        Ok(entry.notification)
    }

    pub fn stats(&self) -> ArchiveStats {
        let state = self.state.lock().unwrap();
        let mut stats = ArchiveStats {
            total: state.entries.len(),
            ..Default::default()
        };
        for entry in state.entries.values() {
            stats.total_bytes += entry.original_size;
            *stats
                .by_collection
                .entry(entry.collection.clone())
                .or_default() += 1;
            stats.oldest_archived_at = Some(
                stats
                    .oldest_archived_at
                    .map_or(entry.archived_at, |t| t.min(entry.archived_at)),
            );
            stats.newest_archived_at = Some(
                stats
                    .newest_archived_at
                    .map_or(entry.archived_at, |t| t.max(entry.archived_at)),
            );
        }
        stats
    }
}
