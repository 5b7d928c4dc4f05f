use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::{Archive, ArchiveStats, DAY_MS};
use crate::export::{self, ExportOptions, ImportOptions, RecordError};
use crate::groups::GroupManager;
use crate::notifications::{
    now_millis, ErrorReporter, LoggingErrorReporter, Notification, NotificationError,
    NotificationFilter, NotificationPatch, NotificationPreferences, NotificationResult,
    NotificationType, NotifyOptions, PreferencesStore, QueryResult,
};
use crate::optimizer::Optimizer;
use crate::priority::PriorityManager;
use crate::pubsub::{DeliveryCallback, DeliveryOutcome, PubSub, SubscriptionFilter};
use crate::scheduler::DeliverySink;
use crate::security::{
    check_access, check_permissions, check_session, decrypt_for, is_encrypted,
    required_permission, NotificationCipher, SecurityContext,
};
use crate::server::metrics;
use crate::store::{NotificationStore, StoreChange, StoreStats};
use crate::sync::SyncEngine;
use crate::templates::TemplateRegistry;

/// Collection name used by the periodic archive sweep.
pub const SWEEP_COLLECTION: &str = "read";

/// Result of importing a document into the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSweepReport {
    pub archived: usize,
    pub expired: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub store: StoreStats,
    pub subscriptions: usize,
    pub pubsub_queue: usize,
    pub priority_queue: usize,
    pub sync_pending: usize,
    pub archive: Option<ArchiveStats>,
}

/// Public entry point of the notification engine.
///
/// Composes the store, groups, pub/sub, templates and export pipeline, plus
/// whichever optional components were attached at build time. Notifications
/// are stored in encrypted form when a cipher is configured and are always
/// handed to subscribers and callers in plaintext. The `*_for` read paths
/// check a caller's `SecurityContext` before anything is decrypted.
pub struct NotificationManager {
    store: Arc<NotificationStore>,
    groups: Arc<GroupManager>,
    pubsub: Arc<PubSub>,
    templates: Arc<TemplateRegistry>,
    preferences: PreferencesStore,
    priority: Option<Arc<PriorityManager>>,
    optimizer: Option<Arc<Optimizer>>,
    sync: Option<Arc<SyncEngine>>,
    archive: Option<Arc<Archive>>,
    cipher: Option<Arc<NotificationCipher>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl NotificationManager {
    pub fn new(
        store: Arc<NotificationStore>,
        groups: Arc<GroupManager>,
        pubsub: Arc<PubSub>,
        templates: Arc<TemplateRegistry>,
        preferences: PreferencesStore,
    ) -> Self {
        Self {
            store,
            groups,
            pubsub,
            templates,
            preferences,
            priority: None,
            optimizer: None,
            sync: None,
            archive: None,
            cipher: None,
            reporter: Arc::new(LoggingErrorReporter),
        }
    }

    /// Route deliveries through per-priority queues instead of publishing directly.
    pub fn with_priority_manager(mut self, priority: Arc<PriorityManager>) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_optimizer(mut self, optimizer: Arc<Optimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_sync(mut self, sync: Arc<SyncEngine>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_archive(mut self, archive: Arc<Archive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<NotificationCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn groups(&self) -> &Arc<GroupManager> {
        &self.groups
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    pub fn archive(&self) -> Option<&Arc<Archive>> {
        self.archive.as_ref()
    }

    pub fn cipher(&self) -> Option<&Arc<NotificationCipher>> {
        self.cipher.as_ref()
    }

    fn reported<T>(&self, result: NotificationResult<T>) -> NotificationResult<T> {
        result.inspect_err(|err| {
            self.reporter.report(err);
        })
    }

    /// Build, store and dispatch a notification.
    pub fn notify(
        &self,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        options: NotifyOptions,
    ) -> NotificationResult<Notification> {
        let notification = build(notification_type, title, message, options);
        self.submit(notification)
    }

    pub fn notify_from_template(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
        options: NotifyOptions,
    ) -> NotificationResult<Notification> {
        let rendered = self.reported(self.templates.render(name, vars))?;
        let mut options = options;
        options.priority = options.priority.or(Some(rendered.priority));
        options.group = options.group.or(rendered.group);
        let notification = build(
            rendered.notification_type,
            &rendered.title,
            &rendered.message,
            options,
        );
        self.submit(notification)
    }

    /// `notify` addressed to one user, honouring their preferences.
    /// Returns `None` when the preferences filtered the notification out.
    pub fn notify_for_user(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        options: NotifyOptions,
    ) -> NotificationResult<Option<Notification>> {
        let notification = build(
            notification_type,
            title,
            message,
            NotifyOptions {
                user_id: Some(user_id.to_string()),
                ..options
            },
        );
        let preferences = self.preferences(user_id)?;
        if !preferences.allows(&notification) {
            debug!(
                "Skipping {} {} for {}: disabled by preferences",
                notification.priority.as_str(),
                notification_type.as_str(),
                user_id
            );
            return Ok(None);
        }
        self.submit(notification).map(Some)
    }

    /// Like `notify` but bypasses the priority queues and waits for every
    /// matching subscriber's delivery outcome.
    pub async fn notify_and_wait(
        &self,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        options: NotifyOptions,
    ) -> NotificationResult<(Notification, Vec<DeliveryOutcome>)> {
        let notification = self.persist(build(notification_type, title, message, options))?;
        let outcomes = self.reported(self.pubsub.publish_and_wait(notification.clone()).await)?;
        Ok((notification, outcomes))
    }

    fn submit(&self, notification: Notification) -> NotificationResult<Notification> {
        let notification = self.persist(notification)?;
        self.dispatch(notification.clone());
        Ok(notification)
    }

    /// Validate, optimize, group and store. Returns the plaintext record.
    fn persist(&self, mut notification: Notification) -> NotificationResult<Notification> {
        self.reported(notification.validate())?;
        if self.store.contains(&notification.id) {
            return self.reported(Err(NotificationError::Validation(format!(
                "notification {} already exists",
                notification.id
            ))));
        }
        let now = now_millis();

        if let Some(optimizer) = &self.optimizer {
            let adjusted = optimizer.optimize(&notification, now);
            if adjusted != notification.priority {
                debug!(
                    "Optimizer moved {} from {} to {}",
                    notification.id,
                    notification.priority.as_str(),
                    adjusted.as_str()
                );
                notification.priority = adjusted;
            }
        }

        let mut evicted = Vec::new();
        if let Some(assignment) = self.groups.assign(&notification, now) {
            notification.group = Some(assignment.group_id);
            evicted = assignment.evicted;
        }

        let at_rest = match &self.cipher {
            Some(cipher) => self.reported(
                cipher
                    .encrypt_notification(&notification)
                    .map_err(NotificationError::from),
            )?,
            None => notification.clone(),
        };
        let stored = match self.reported(self.store.add(at_rest)) {
            Ok(stored) => stored,
            Err(err) => {
                self.groups.remove_member(&notification.id);
                return Err(err);
            }
        };

        metrics::record_notification_created(
            notification.notification_type.as_str(),
            notification.priority.as_str(),
        );
        self.record_sync(&[StoreChange::Added(stored)]);
        self.ungroup(&evicted);
        debug!(
            "Stored {} notification {}",
            notification.notification_type.as_str(),
            notification.id
        );
        Ok(notification)
    }

    /// Clear the stored group of notifications that dropped out of theirs.
    fn ungroup(&self, ids: &[String]) {
        for id in ids {
            match self.store.update(id, NotificationPatch::set_group(None)) {
                Ok(updated) => {
                    if let Some(sync) = &self.sync {
                        sync.record(crate::sync::SyncOpKind::Update, id, Some(updated));
                    }
                }
                Err(NotificationError::NotFound(_)) => {
                    debug!("Ungrouped {} is no longer stored", id);
                }
                Err(err) => {
                    self.reporter.report(&err);
                }
            }
        }
    }

    fn dispatch(&self, notification: Notification) {
        match &self.priority {
            Some(priority) => priority.enqueue(notification),
            None => self.pubsub.publish(notification),
        }
    }

    fn record_sync(&self, changes: &[StoreChange]) {
        if let Some(sync) = &self.sync {
            for change in changes {
                sync.record_change(change);
            }
        }
    }

    /// Process whatever is queued for delivery right now.
    pub async fn flush(&self) -> usize {
        let mut processed = 0;
        if let Some(priority) = &self.priority {
            processed += priority.drain_once().await;
        }
        loop {
            let batch = self.pubsub.process_batch().await;
            if batch == 0 {
                break;
            }
            processed += batch;
        }
        processed
    }

    pub fn subscribe(
        &self,
        callback: Arc<dyn DeliveryCallback>,
        filter: Option<SubscriptionFilter>,
    ) -> String {
        self.pubsub.subscribe(callback, filter)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.pubsub.unsubscribe(subscription_id)
    }

    fn reveal(&self, notification: Notification) -> NotificationResult<Notification> {
        match &self.cipher {
            Some(cipher) if is_encrypted(&notification) => self.reported(
                cipher
                    .decrypt_notification(&notification)
                    .map_err(NotificationError::from),
            ),
            _ => Ok(notification),
        }
    }

    pub fn get(&self, id: &str) -> NotificationResult<Notification> {
        let stored = self.reported(
            self.store
                .get(id)
                .ok_or_else(|| NotificationError::not_found(id)),
        )?;
        self.reveal(stored)
    }

    fn reveal_for(
        &self,
        notification: Notification,
        context: &SecurityContext,
        now: i64,
    ) -> NotificationResult<Notification> {
        let revealed = match &self.cipher {
            Some(cipher) if is_encrypted(&notification) => {
                decrypt_for(context, cipher, &notification, now)
            }
            _ => check_access(context, &notification, now).map(|()| notification),
        };
        self.reported(revealed)
    }

    /// `get` on behalf of a caller. Another user's notification reads as missing.
    pub fn get_for(&self, id: &str, context: &SecurityContext) -> NotificationResult<Notification> {
        let stored = self.reported(
            self.store
                .get(id)
                .filter(|n| visible_to(n, context))
                .ok_or_else(|| NotificationError::not_found(id)),
        )?;
        self.reveal_for(stored, context, now_millis())
    }

    /// `query` on behalf of a caller, limited to the caller's notifications
    /// of the types it may read.
    pub fn query_for(
        &self,
        filter: &NotificationFilter,
        context: &SecurityContext,
    ) -> NotificationResult<QueryResult> {
        let now = now_millis();
        self.reported(check_session(context, now))?;
        if filter.user_id.as_ref().is_some_and(|u| u != &context.user_id) {
            return self.reported(Err(NotificationError::AccessDenied(format!(
                "{} may only read their own notifications",
                context.user_id
            ))));
        }
        let types: Vec<NotificationType> = NotificationType::ALL
            .into_iter()
            .filter(|t| filter.types.is_empty() || filter.types.contains(t))
            .filter(|t| context.has(required_permission(*t)))
            .collect();
        if types.is_empty() {
            return self.reported(Err(NotificationError::AccessDenied(format!(
                "{} may not read the requested notification types",
                context.user_id
            ))));
        }
        let scoped = NotificationFilter {
            types,
            user_id: Some(context.user_id.clone()),
            ..filter.clone()
        };
        let page = self.store.query(&scoped);
        let notifications = page
            .notifications
            .into_iter()
            .map(|n| self.reveal_for(n, context, now))
            .collect::<NotificationResult<Vec<_>>>()?;
        Ok(QueryResult {
            notifications,
            total: page.total,
        })
    }

    pub fn query(&self, filter: &NotificationFilter) -> NotificationResult<QueryResult> {
        let page = self.store.query(filter);
        let notifications = page
            .notifications
            .into_iter()
            .map(|n| self.reveal(n))
            .collect::<NotificationResult<Vec<_>>>()?;
        Ok(QueryResult {
            notifications,
            total: page.total,
        })
    }

    /// Mark the given notifications as read. With `user_id`, every id must
    /// belong to that user. Reading also acknowledges a pending delivery.
    pub fn mark_as_read(
        &self,
        ids: &[String],
        user_id: Option<&str>,
    ) -> NotificationResult<Vec<Notification>> {
        self.check_owner(ids, user_id)?;
        let updates = ids
            .iter()
            .map(|id| (id.clone(), NotificationPatch::mark_read(true)))
            .collect();
        let updated = self.reported(self.store.update_batch(updates))?;
        self.after_read(&updated);
        updated.into_iter().map(|n| self.reveal(n)).collect()
    }

    /// `mark_as_read` on behalf of a caller. Nothing is marked unless the
    /// caller owns and may read every notification.
    pub fn mark_as_read_for(
        &self,
        ids: &[String],
        context: &SecurityContext,
    ) -> NotificationResult<Vec<Notification>> {
        let now = now_millis();
        self.reported(check_session(context, now))?;
        self.check_owner(ids, Some(&context.user_id))?;
        for id in ids {
            if let Some(stored) = self.store.get(id) {
                self.reported(check_permissions(context, &stored))?;
            }
        }
        let updates = ids
            .iter()
            .map(|id| (id.clone(), NotificationPatch::mark_read(true)))
            .collect();
        let updated = self.reported(self.store.update_batch(updates))?;
        self.after_read(&updated);
        updated
            .into_iter()
            .map(|n| self.reveal_for(n, context, now))
            .collect()
    }

    pub fn mark_all_read(&self, user_id: Option<&str>) -> NotificationResult<Vec<Notification>> {
        let updated = self.reported(self.store.mark_all_read(user_id))?;
        self.after_read(&updated);
        updated.into_iter().map(|n| self.reveal(n)).collect()
    }

    fn after_read(&self, updated: &[Notification]) {
        if let Some(priority) = &self.priority {
            for n in updated {
                priority.acknowledge(&n.id);
            }
        }
        if let Some(sync) = &self.sync {
            for n in updated {
                sync.record(crate::sync::SyncOpKind::Update, &n.id, Some(n.clone()));
            }
        }
    }

    pub fn delete(&self, ids: &[String], user_id: Option<&str>) -> NotificationResult<usize> {
        self.check_owner(ids, user_id)?;
        let removed = self.reported(self.store.remove_batch(ids))?;
        for n in &removed {
            self.groups.remove_member(&n.id);
        }
        let changes: Vec<StoreChange> = removed.into_iter().map(StoreChange::Removed).collect();
        self.record_sync(&changes);
        info!("Deleted {} notifications", changes.len());
        Ok(changes.len())
    }

    fn check_owner(&self, ids: &[String], user_id: Option<&str>) -> NotificationResult<()> {
        let Some(user_id) = user_id else {
            return Ok(());
        };
        for id in ids {
            let owned = self
                .store
                .get(id)
                .map(|n| n.user_id.as_deref() == Some(user_id))
                .unwrap_or(false);
            if !owned {
                return self.reported(Err(NotificationError::not_found(format!(
                    "{} for user {}",
                    id, user_id
                ))));
            }
        }
        Ok(())
    }

    pub fn unread_count(&self, user_id: Option<&str>) -> usize {
        self.store.unread_count(user_id)
    }

    pub fn preferences(&self, user_id: &str) -> NotificationResult<NotificationPreferences> {
        self.reported(self.preferences.get(user_id).map_err(NotificationError::from))
    }

    pub fn set_preferences(
        &self,
        user_id: &str,
        preferences: &NotificationPreferences,
    ) -> NotificationResult<()> {
        self.reported(
            self.preferences
                .set(user_id, preferences)
                .map_err(NotificationError::from),
        )
    }

    /// Export plaintext notifications matching `options.filter`.
    pub fn export(&self, options: &ExportOptions) -> NotificationResult<Vec<u8>> {
        let notifications = self
            .store
            .all()
            .into_iter()
            .map(|n| self.reveal(n))
            .collect::<NotificationResult<Vec<_>>>()?;
        self.reported(export::export(
            &notifications,
            options,
            self.cipher.as_deref(),
            now_millis(),
        ))
    }

    /// Import a document. Records that fail validation or collide with an
    /// existing id are reported individually; the rest are stored.
    pub fn import(&self, input: &[u8], options: &ImportOptions) -> NotificationResult<ImportReport> {
        let outcome = self.reported(export::import(input, options, self.cipher.as_deref()))?;
        let mut report = ImportReport {
            imported: 0,
            errors: outcome.errors,
        };
        for (index, notification) in outcome.notifications {
            let id = notification.id.clone();
            match self.persist(notification) {
                Ok(_) => report.imported += 1,
                Err(err) => report.errors.push(RecordError {
                    index,
                    id: Some(id),
                    message: err.to_string(),
                }),
            }
        }
        report.errors.sort_by_key(|e| e.index);
        info!(
            "Imported {} notifications ({} rejected)",
            report.imported,
            report.errors.len()
        );
        Ok(report)
    }

    /// Drop expired notifications and stale group members.
    pub fn sweep_expired(&self, now: i64) -> NotificationResult<usize> {
        let removed = self.reported(self.store.remove_expired(now))?;
        for n in &removed {
            self.groups.remove_member(&n.id);
        }
        let stale = self.groups.sweep_expired(now);
        if !stale.is_empty() {
            debug!("Dropped {} expired group members", stale.len());
            self.ungroup(&stale);
        }
        let changes: Vec<StoreChange> = removed.into_iter().map(StoreChange::Removed).collect();
        self.record_sync(&changes);
        Ok(changes.len())
    }

    /// Move old read notifications into the archive, then apply retention
    /// and the storage limit.
    pub fn sweep_archive(&self, now: i64) -> NotificationResult<ArchiveSweepReport> {
        let Some(archive) = &self.archive else {
            return Ok(ArchiveSweepReport::default());
        };
        let cutoff = now - archive.settings().archive_after_days as i64 * DAY_MS;
        let candidates: Vec<String> = self
            .store
            .query(&NotificationFilter {
                read: Some(true),
                to: Some(cutoff - 1),
                ..Default::default()
            })
            .notifications
            .into_iter()
            .map(|n| n.id)
            .collect();

        let mut report = ArchiveSweepReport::default();
        if !candidates.is_empty() {
            let removed = self.reported(self.store.remove_batch(&candidates))?;
            for n in &removed {
                self.groups.remove_member(&n.id);
            }
            report.archived = archive.archive(removed, SWEEP_COLLECTION, now).len();
        }
        report.expired = archive.cleanup(now);
        report.evicted = archive.enforce_storage_limit();
        if report != ArchiveSweepReport::default() {
            info!(
                "Archive sweep: {} archived, {} past retention, {} over limit",
                report.archived, report.expired, report.evicted
            );
        }
        Ok(report)
    }

    /// Put an archived notification back into the store.
    pub fn restore_archived(&self, archive_id: &str) -> NotificationResult<Notification> {
        let archive = self.archive.as_ref().ok_or_else(|| {
            NotificationError::not_found(format!("archive entry {}", archive_id))
        })?;
        let notification = self.reported(archive.restore(archive_id))?;
        let stored = self.reported(self.store.add(notification))?;
        self.record_sync(&[StoreChange::Added(stored.clone())]);
        self.reveal(stored)
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            store: self.store.stats(),
            subscriptions: self.pubsub.subscription_count(),
            pubsub_queue: self.pubsub.queue_len(),
            priority_queue: self
                .priority
                .as_ref()
                .map(|p| p.total_queued())
                .unwrap_or(0),
            sync_pending: self.sync.as_ref().map(|s| s.pending().len()).unwrap_or(0),
            archive: self.archive.as_ref().map(|a| a.stats()),
        }
    }
}

fn visible_to(notification: &Notification, context: &SecurityContext) -> bool {
    notification
        .user_id
        .as_ref()
        .map_or(true, |owner| owner == &context.user_id)
}

fn build(
    notification_type: NotificationType,
    title: &str,
    message: &str,
    options: NotifyOptions,
) -> Notification {
    let mut notification = Notification::new(
        notification_type,
        options.priority.unwrap_or_default(),
        title,
        message,
    );
    notification.group = options.group;
    notification.expires_at = options.expires_at;
    notification.data = options.data;
    notification.actions = options.actions;
    notification.user_id = options.user_id;
    notification
}

/// Scheduled firings: store the occurrence unless a retry already did, then
/// deliver it and fail if any subscriber failed.
#[async_trait]
impl DeliverySink for NotificationManager {
    async fn deliver(&self, notification: Notification) -> NotificationResult<()> {
        let notification = if self.store.contains(&notification.id) {
            notification
        } else {
            self.persist(notification)?
        };
        let outcomes = self.reported(self.pubsub.publish_and_wait(notification).await)?;
        match outcomes.into_iter().find(|o| !o.success) {
            Some(failed) => {
                warn!(
                    "Scheduled delivery to {} failed: {}",
                    failed.subscriber_id,
                    failed.error.as_deref().unwrap_or("unknown error")
                );
                Err(NotificationError::DeliveryFailed(format!(
                    "subscriber {}: {}",
                    failed.subscriber_id,
                    failed.error.unwrap_or_default()
                )))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveSettings, PrioritySettings, PubSubSettings, StoreSettings};
    use crate::export::ExportFormat;
    use crate::groups::{GroupDefinition, RuleCondition};
    use crate::kv_store::{InMemoryKeyValueStore, KeyValueStore};
    use crate::notifications::{Priority, TypePreference};
    use crate::pubsub::ChannelCallback;
    use crate::security::{test_settings, READ_NFT, READ_SECURITY};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        manager: NotificationManager,
        kv: Arc<dyn KeyValueStore>,
    }

    fn harness() -> Harness {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let store = Arc::new(NotificationStore::new(
            &StoreSettings::default(),
            Some(kv.clone()),
        ));
        let pubsub = PubSub::new(
            PubSubSettings {
                base_delay_ms: 1,
                max_delay_ms: 2,
                ..Default::default()
            },
            CancellationToken::new(),
        );
        let manager = NotificationManager::new(
            store,
            Arc::new(GroupManager::new()),
            pubsub,
            Arc::new(TemplateRegistry::with_defaults()),
            PreferencesStore::new(kv.clone()),
        );
        Harness { manager, kv }
    }

    /// Records every notification handed to it.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl DeliveryCallback for Recorder {
        async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
            self.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notify_stores_and_delivers_to_matching_subscriber() {
        let Harness { manager, .. } = harness();
        let listed = Arc::new(Recorder::default());
        let sold = Arc::new(Recorder::default());
        manager.subscribe(
            listed.clone(),
            Some(SubscriptionFilter::types([NotificationType::NftListed])),
        );
        manager.subscribe(
            sold.clone(),
            Some(SubscriptionFilter::types([NotificationType::NftSold])),
        );

        let created = manager
            .notify(
                NotificationType::NftListed,
                "X",
                "listed",
                NotifyOptions::with_priority(Priority::High).group("nft"),
            )
            .unwrap();
        manager.flush().await;

        let stored = manager.query(&NotificationFilter::default()).unwrap();
        assert_eq!(stored.total, 1);
        assert_eq!(stored.notifications[0].id, created.id);
        assert!(!stored.notifications[0].read);
        assert_eq!(stored.notifications[0].group.as_deref(), Some("nft"));

        let seen = listed.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, created.id);
        assert!(!seen[0].read);
        assert!(sold.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rule_groups_are_assigned() {
        let Harness { manager, .. } = harness();
        manager
            .groups()
            .create_group(GroupDefinition {
                id: "security".into(),
                name: "Security".into(),
                rules: Some(RuleCondition::type_is(NotificationType::Security)),
                max_size: 10,
                expiry_ms: None,
            })
            .unwrap();
        let n = manager
            .notify(
                NotificationType::Security,
                "New login",
                "from Lisbon",
                NotifyOptions::default(),
            )
            .unwrap();
        assert_eq!(n.group.as_deref(), Some("security"));
        assert_eq!(manager.groups().members("security"), vec![n.id.clone()]);
        assert_eq!(manager.get(&n.id).unwrap().group.as_deref(), Some("security"));
    }

    #[tokio::test]
    async fn test_invalid_notifications_are_rejected() {
        let Harness { manager, .. } = harness();
        let err = manager
            .notify(NotificationType::System, "", "m", NotifyOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(manager.store().is_empty());
    }

    #[tokio::test]
    async fn test_templates() {
        let Harness { manager, .. } = harness();
        let vars = BTreeMap::from([
            ("collection".to_string(), "Apes".to_string()),
            ("price".to_string(), "2 ETH".to_string()),
        ]);
        let n = manager
            .notify_from_template("nft_listed", &vars, NotifyOptions::default())
            .unwrap();
        assert_eq!(n.title, "Apes listed");
        assert_eq!(n.notification_type, NotificationType::NftListed);

        let err = manager
            .notify_from_template("nope", &vars, NotifyOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(manager
            .notify_from_template("nft_listed", &BTreeMap::new(), NotifyOptions::default())
            .is_err());
    }

    #[tokio::test]
    async fn test_notify_for_user_respects_preferences() {
        let Harness { manager, .. } = harness();
        let mut prefs = NotificationPreferences::default();
        prefs.types.insert(
            NotificationType::PriceAlert,
            TypePreference {
                min_priority: Priority::High,
                ..Default::default()
            },
        );
        manager.set_preferences("alice", &prefs).unwrap();

        let skipped = manager
            .notify_for_user(
                "alice",
                NotificationType::PriceAlert,
                "ETH",
                "moved",
                NotifyOptions::with_priority(Priority::Low),
            )
            .unwrap();
        assert!(skipped.is_none());

        let kept = manager
            .notify_for_user(
                "alice",
                NotificationType::PriceAlert,
                "ETH",
                "crashed",
                NotifyOptions::with_priority(Priority::Urgent),
            )
            .unwrap()
            .unwrap();
        assert_eq!(kept.user_id.as_deref(), Some("alice"));
        assert_eq!(manager.unread_count(Some("alice")), 1);
        assert_eq!(manager.preferences("alice").unwrap(), prefs);
    }

    #[tokio::test]
    async fn test_read_and_delete_are_scoped_to_owner() {
        let Harness { manager, .. } = harness();
        let mine = manager
            .notify(
                NotificationType::TokenTransfer,
                "In",
                "1 ETH",
                NotifyOptions::default().user("alice"),
            )
            .unwrap();
        let theirs = manager
            .notify(
                NotificationType::TokenTransfer,
                "In",
                "2 ETH",
                NotifyOptions::default().user("bob"),
            )
            .unwrap();

        let err = manager
            .mark_as_read(&[theirs.id.clone()], Some("alice"))
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let read = manager.mark_as_read(&[mine.id.clone()], Some("alice")).unwrap();
        assert!(read[0].read);
        assert_eq!(manager.unread_count(Some("alice")), 0);
        assert_eq!(manager.unread_count(Some("bob")), 1);

        assert_eq!(manager.mark_all_read(Some("bob")).unwrap().len(), 1);
        assert!(manager.delete(&[mine.id.clone()], Some("bob")).is_err());
        assert_eq!(manager.delete(&[mine.id.clone()], Some("alice")).unwrap(), 1);
        assert!(manager.get(&mine.id).is_err());
    }

    #[tokio::test]
    async fn test_encrypted_at_rest_but_plaintext_to_subscribers() {
        let Harness { manager, .. } = harness();
        let cipher = Arc::new(NotificationCipher::new("secret", &test_settings()).unwrap());
        let manager = manager.with_cipher(cipher);
        let (callback, mut rx) = ChannelCallback::channel(4);
        manager.subscribe(Arc::new(callback), None);

        let n = manager
            .notify(
                NotificationType::Security,
                "Password changed",
                "just now",
                NotifyOptions::default(),
            )
            .unwrap();
        manager.flush().await;

        let raw = manager.store().get(&n.id).unwrap();
        assert!(is_encrypted(&raw));
        assert_ne!(raw.title, "Password changed");
        assert_eq!(rx.recv().await.unwrap().title, "Password changed");
        assert_eq!(manager.get(&n.id).unwrap().title, "Password changed");
        assert_eq!(
            manager.query(&NotificationFilter::default()).unwrap().notifications[0].message,
            "just now"
        );
    }

    #[tokio::test]
    async fn test_reads_for_a_caller_check_access_before_decrypting() {
        let Harness { manager, .. } = harness();
        let cipher = Arc::new(NotificationCipher::new("secret", &test_settings()).unwrap());
        let manager = manager.with_cipher(cipher);
        let n = manager
            .notify(
                NotificationType::Security,
                "Password changed",
                "just now",
                NotifyOptions::default().user("alice"),
            )
            .unwrap();
        let now = now_millis();

        let allowed = SecurityContext::new("alice", now + 60_000).grant(READ_SECURITY);
        assert_eq!(manager.get_for(&n.id, &allowed).unwrap().title, "Password changed");
        let page = manager
            .query_for(&NotificationFilter::default(), &allowed)
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.notifications[0].message, "just now");

        let expired = SecurityContext::new("alice", now - 1).grant(READ_SECURITY);
        assert_eq!(manager.get_for(&n.id, &expired).unwrap_err().code(), "ACCESS_DENIED");
        assert_eq!(
            manager
                .query_for(&NotificationFilter::default(), &expired)
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );

        let mut untrusted = allowed.clone();
        untrusted.device_trusted = false;
        assert_eq!(manager.get_for(&n.id, &untrusted).unwrap_err().code(), "ACCESS_DENIED");

        let unprivileged = SecurityContext::new("alice", now + 60_000).grant(READ_NFT);
        assert_eq!(
            manager.get_for(&n.id, &unprivileged).unwrap_err().code(),
            "ACCESS_DENIED"
        );
        assert_eq!(
            manager
                .query_for(&NotificationFilter::by_type(NotificationType::Security), &unprivileged)
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );
        assert_eq!(
            manager
                .query_for(&NotificationFilter::default(), &unprivileged)
                .unwrap()
                .total,
            0
        );
        assert_eq!(
            manager
                .mark_as_read_for(&[n.id.clone()], &unprivileged)
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );
        assert_eq!(manager.unread_count(Some("alice")), 1);

        let bob = SecurityContext::new("bob", now + 60_000).grant(READ_SECURITY);
        assert_eq!(manager.get_for(&n.id, &bob).unwrap_err().code(), "NOT_FOUND");

        let read = manager.mark_as_read_for(&[n.id.clone()], &allowed).unwrap();
        assert!(read[0].read);
        assert_eq!(read[0].title, "Password changed");
    }

    #[tokio::test]
    async fn test_members_leaving_a_group_are_ungrouped_in_the_store() {
        let Harness { manager, .. } = harness();
        manager
            .groups()
            .create_group(GroupDefinition {
                id: "listings".into(),
                name: "Listings".into(),
                rules: Some(RuleCondition::type_is(NotificationType::NftListed)),
                max_size: 1,
                expiry_ms: None,
            })
            .unwrap();
        let listed: Vec<Notification> = (0..3)
            .map(|i| {
                manager
                    .notify(
                        NotificationType::NftListed,
                        &format!("Ape #{}", i),
                        "listed",
                        NotifyOptions::default(),
                    )
                    .unwrap()
            })
            .collect();

        assert_eq!(manager.groups().members("listings"), vec![listed[2].id.clone()]);
        let grouped = manager.query(&NotificationFilter {
            group: Some("listings".into()),
            ..Default::default()
        });
        assert_eq!(grouped.unwrap().total, 1);
        assert_eq!(manager.get(&listed[0].id).unwrap().group, None);
        assert!(manager.store().validate_indices());

        manager
            .groups()
            .create_group(GroupDefinition {
                id: "security".into(),
                name: "Security".into(),
                rules: Some(RuleCondition::type_is(NotificationType::Security)),
                max_size: 10,
                expiry_ms: Some(1_000),
            })
            .unwrap();
        let login = manager
            .notify(
                NotificationType::Security,
                "New login",
                "from Lisbon",
                NotifyOptions::default(),
            )
            .unwrap();
        assert_eq!(login.group.as_deref(), Some("security"));
        manager.sweep_expired(now_millis() + 10_000).unwrap();
        assert!(manager.groups().members("security").is_empty());
        assert_eq!(manager.get(&login.id).unwrap().group, None);
    }

    #[tokio::test]
    async fn test_import_errors_point_at_the_original_record() {
        let Harness { manager, .. } = harness();
        let existing = manager
            .notify(NotificationType::System, "Hello", "m", NotifyOptions::default())
            .unwrap();
        let fresh = Notification::new(NotificationType::System, Priority::Low, "New", "m");
        let document = json!([existing, {"id": "bad"}, fresh]).to_string();

        let report = manager
            .import(document.as_bytes(), &ImportOptions::default())
            .unwrap();
        assert_eq!(report.imported, 1);
        let positions: Vec<(usize, Option<&str>)> = report
            .errors
            .iter()
            .map(|e| (e.index, e.id.as_deref()))
            .collect();
        assert_eq!(
            positions,
            vec![(0, Some(existing.id.as_str())), (1, Some("bad"))]
        );
        assert!(manager.store().contains(&fresh.id));
    }

    #[tokio::test]
    async fn test_priority_manager_routes_deliveries() {
        let Harness { manager, .. } = harness();
        let priority = PriorityManager::new(
            PrioritySettings::default(),
            manager.pubsub().clone(),
            CancellationToken::new(),
        );
        let manager = manager.with_priority_manager(priority.clone());
        let recorder = Arc::new(Recorder::default());
        manager.subscribe(recorder.clone(), None);

        manager
            .notify(NotificationType::System, "low", "m", NotifyOptions::with_priority(Priority::Low))
            .unwrap();
        manager
            .notify(
                NotificationType::System,
                "urgent",
                "m",
                NotifyOptions::with_priority(Priority::Urgent),
            )
            .unwrap();
        assert_eq!(priority.total_queued(), 2);
        manager.flush().await;

        let titles: Vec<String> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect();
        assert_eq!(titles, vec!["urgent", "low"]);
    }

    #[tokio::test]
    async fn test_export_import_between_managers() {
        let Harness { manager: source, .. } = harness();
        for i in 0..3 {
            source
                .notify(
                    NotificationType::NftBid,
                    &format!("Bid {}", i),
                    "m",
                    NotifyOptions::default(),
                )
                .unwrap();
        }
        let bytes = source
            .export(&ExportOptions {
                format: ExportFormat::Xml,
                compress: true,
                ..Default::default()
            })
            .unwrap();

        let Harness { manager: target, .. } = harness();
        let options = ImportOptions {
            format: ExportFormat::Xml,
            encrypted: false,
        };
        let report = target.import(&bytes, &options).unwrap();
        assert_eq!(report.imported, 3);
        assert!(report.errors.is_empty());

        let again = target.import(&bytes, &options).unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.errors.len(), 3);
        assert_eq!(target.store().len(), 3);
    }

    #[tokio::test]
    async fn test_sweeps() {
        let Harness { manager, kv } = harness();
        let archive = Arc::new(Archive::new(ArchiveSettings::default(), Some(kv)));
        let manager = manager.with_archive(archive.clone());
        let now = now_millis();

        let expiring = manager
            .notify(
                NotificationType::PriceAlert,
                "Offer",
                "ends soon",
                NotifyOptions {
                    expires_at: Some(now + 1_000),
                    ..Default::default()
                },
            )
            .unwrap();
        let old = manager
            .notify(NotificationType::System, "Old", "news", NotifyOptions::default())
            .unwrap();
        manager.mark_as_read(&[old.id.clone()], None).unwrap();

        assert_eq!(manager.sweep_expired(now + 1_000).unwrap(), 1);
        assert!(!manager.store().contains(&expiring.id));

        assert_eq!(manager.sweep_archive(now).unwrap().archived, 0);
        let report = manager.sweep_archive(now + 8 * DAY_MS).unwrap();
        assert_eq!(report.archived, 1);
        assert!(manager.store().is_empty());

        let archive_id = archive.query(&Default::default()).entries[0].archive_id.clone();
        let restored = manager.restore_archived(&archive_id).unwrap();
        assert_eq!(restored.id, old.id);
        assert!(manager.store().contains(&old.id));
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_delivery_stores_once() {
        let Harness { manager, .. } = harness();
        let recorder = Arc::new(Recorder::default());
        manager.subscribe(recorder.clone(), None);
        let n = Notification::new(NotificationType::System, Priority::Medium, "Reminder", "m");

        DeliverySink::deliver(&manager, n.clone()).await.unwrap();
        DeliverySink::deliver(&manager, n.clone()).await.unwrap();
        assert_eq!(manager.store().len(), 1);
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }
}
