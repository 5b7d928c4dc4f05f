use super::store::{NotificationStore, StoreChange, StoreOp};
use crate::notifications::{Notification, NotificationPatch, NotificationResult};

/// Buffered group of store mutations, applied atomically on `commit`.
///
/// Dropping a transaction without committing discards it.
pub struct Transaction<'a> {
    store: &'a NotificationStore,
    ops: Vec<StoreOp>,
}

impl<'a> Transaction<'a> {
    pub(super) fn new(store: &'a NotificationStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn add(&mut self, notification: Notification) -> &mut Self {
        self.ops.push(StoreOp::Add(notification));
        self
    }

    pub fn update(&mut self, id: impl Into<String>, patch: NotificationPatch) -> &mut Self {
        self.ops.push(StoreOp::Update(id.into(), patch));
        self
    }

    pub fn remove(&mut self, id: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::Remove(id.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every buffered operation or none of them.
    pub fn commit(self) -> NotificationResult<Vec<StoreChange>> {
        self.store.apply_ops(self.ops)
    }

    pub fn rollback(self) {
        tracing::debug!("Rolling back transaction with {} operations", self.ops.len());
    }
}
