use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::models::SyncOperation;
use crate::notifications::{NotificationError, NotificationResult};

/// Moves sync operations between this device and the sync target.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn connect(&self) -> NotificationResult<()>;

    /// Returns how many operations, from the front, the target acknowledged.
    async fn push(&self, operations: &[SyncOperation]) -> NotificationResult<usize>;

    /// Operations from other devices not yet seen by `device_id`.
    async fn pull(&self, device_id: &str) -> NotificationResult<Vec<SyncOperation>>;

    async fn heartbeat(&self) -> NotificationResult<()>;
}

#[derive(Default)]
struct HubLog {
    operations: Vec<SyncOperation>,
    cursors: HashMap<String, usize>,
}

/// In-process sync target shared by several devices. Keeps an append-only
/// operation log and a read cursor per device.
#[derive(Default)]
pub struct SyncHub {
    log: Mutex<HubLog>,
    offline: AtomicBool,
}

impl SyncHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.log.lock().unwrap().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> NotificationResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NotificationError::delivery("sync target unreachable"));
        }
        Ok(())
    }

    pub fn transport(self: &Arc<Self>) -> HubTransport {
        HubTransport { hub: self.clone() }
    }
}

pub struct HubTransport {
    hub: Arc<SyncHub>,
}

#[async_trait]
impl SyncTransport for HubTransport {
    async fn connect(&self) -> NotificationResult<()> {
        self.hub.check_online()
    }

    async fn push(&self, operations: &[SyncOperation]) -> NotificationResult<usize> {
        self.hub.check_online()?;
        let mut log = self.hub.log.lock().unwrap();
        log.operations.extend_from_slice(operations);
        Ok(operations.len())
    }

    async fn pull(&self, device_id: &str) -> NotificationResult<Vec<SyncOperation>> {
        self.hub.check_online()?;
        let mut log = self.hub.log.lock().unwrap();
        let from = log.cursors.get(device_id).copied().unwrap_or(0);
        let end = log.operations.len();
        let remote = log.operations[from..]
            .iter()
            .filter(|op| op.device_id != device_id)
            .cloned()
            .collect();
        log.cursors.insert(device_id.to_string(), end);
        Ok(remote)
    }

    async fn heartbeat(&self) -> NotificationResult<()> {
        self.hub.check_online()
    }
}
