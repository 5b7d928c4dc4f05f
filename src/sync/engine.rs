use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{
    ConnectionState, ConnectionStateMachine, HeartbeatMonitor, ReconnectPolicy,
};
use super::models::{
    ConflictStrategy, ConflictWinner, SyncConflict, SyncOpKind, SyncOperation, SyncReport,
};
use super::transport::SyncTransport;
use crate::config::SyncSettings;
use crate::kv_store::{load_json, save_json, KeyValueStore};
use crate::notifications::{
    now_millis, Notification, NotificationError, NotificationPatch, NotificationResult,
};
use crate::server::metrics;
use crate::store::{NotificationStore, StoreChange};

const MAX_CONFLICT_RECORDS: usize = 500;

fn queue_key(device_id: &str) -> String {
    format!("sync:queue:{}", device_id)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueue {
    next_sequence: u64,
    operations: Vec<SyncOperation>,
}

struct SyncState {
    queue: PersistedQueue,
    conflicts: VecDeque<SyncConflict>,
    connection: ConnectionStateMachine,
}

/// Reconciles this device's store with other devices through a `SyncTransport`.
///
/// Local changes are queued under `sync:queue:<device>` and survive restarts.
/// They leave the queue only once the target acknowledges them.
pub struct SyncEngine {
    settings: SyncSettings,
    store: Arc<NotificationStore>,
    kv: Arc<dyn KeyValueStore>,
    transport: Arc<dyn SyncTransport>,
    state: Mutex<SyncState>,
    changed: Notify,
    shutdown_token: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        settings: SyncSettings,
        store: Arc<NotificationStore>,
        kv: Arc<dyn KeyValueStore>,
        transport: Arc<dyn SyncTransport>,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        let queue: PersistedQueue =
            load_json(kv.as_ref(), &queue_key(&settings.device_id))?.unwrap_or_default();
        if !queue.operations.is_empty() {
            info!(
                "Restored {} unsynced operations for device {}",
                queue.operations.len(),
                settings.device_id
            );
        }
        let connection = ConnectionStateMachine::new(ReconnectPolicy::new(&settings));
        Ok(Self {
            settings,
            store,
            kv,
            transport,
            state: Mutex::new(SyncState {
                queue,
                conflicts: VecDeque::new(),
                connection,
            }),
            changed: Notify::new(),
            shutdown_token,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.settings.device_id
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.settings.strategy
    }

    pub fn pending(&self) -> Vec<SyncOperation> {
        self.state.lock().unwrap().queue.operations.clone()
    }

    pub fn conflicts(&self) -> Vec<SyncConflict> {
        self.state.lock().unwrap().conflicts.iter().cloned().collect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().unwrap().connection.state()
    }

    pub fn is_degraded(&self) -> bool {
        self.state.lock().unwrap().connection.is_degraded()
    }

    pub fn record(
        &self,
        op: SyncOpKind,
        notification_id: &str,
        snapshot: Option<Notification>,
    ) -> SyncOperation {
        self.record_at(op, notification_id, snapshot, now_millis())
    }

    pub fn record_at(
        &self,
        op: SyncOpKind,
        notification_id: &str,
        snapshot: Option<Notification>,
        timestamp: i64,
    ) -> SyncOperation {
        let operation = {
            let mut state = self.state.lock().unwrap();
            let operation = SyncOperation {
                op,
                notification_id: notification_id.to_string(),
                snapshot,
                device_id: self.settings.device_id.clone(),
                timestamp,
                sequence: state.queue.next_sequence,
            };
            state.queue.next_sequence += 1;
            state.queue.operations.push(operation.clone());
            self.persist(&state.queue);
            operation
        };
        debug!(
            "Queued sync {} of {} (seq {})",
            operation.op.as_str(),
            operation.notification_id,
            operation.sequence
        );
        self.changed.notify_one();
        operation
    }

    /// Queue the sync operation matching a store change.
    pub fn record_change(&self, change: &StoreChange) -> SyncOperation {
        match change {
            StoreChange::Added(n) => self.record(SyncOpKind::Create, &n.id, Some(n.clone())),
            StoreChange::Updated { after, .. } => {
                self.record(SyncOpKind::Update, &after.id, Some(after.clone()))
            }
            StoreChange::Removed(n) => self.record(SyncOpKind::Delete, &n.id, None),
        }
    }

    fn persist(&self, queue: &PersistedQueue) {
        if let Err(err) = save_json(self.kv.as_ref(), &queue_key(&self.settings.device_id), queue)
        {
            warn!("Failed to persist sync queue: {:#}", err);
        }
    }

    /// Pull remote operations, settle conflicts, then push the local queue.
    pub async fn sync_once(&self) -> SyncReport {
        let started = Instant::now();
        let mut report = SyncReport::default();

        match self.transport.pull(&self.settings.device_id).await {
            Ok(remote) => {
                for operation in remote {
                    report.pulled += 1;
                    match self.receive(operation) {
                        Ok(conflict) => {
                            if conflict {
                                report.conflicts_resolved += 1;
                            }
                        }
                        Err(err) => {
                            warn!("Failed to apply remote operation: {}", err);
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(err) => warn!("Sync pull failed: {}", err),
        }

        let outgoing = self.pending();
        if !outgoing.is_empty() {
            match self.transport.push(&outgoing).await {
                Ok(acknowledged) => {
                    let acknowledged = acknowledged.min(outgoing.len());
                    let acked_sequences: Vec<u64> =
                        outgoing[..acknowledged].iter().map(|op| op.sequence).collect();
                    let mut state = self.state.lock().unwrap();
                    state
                        .queue
                        .operations
                        .retain(|op| !acked_sequences.contains(&op.sequence));
                    self.persist(&state.queue);
                    report.pushed = acknowledged;
                    report.failed += outgoing.len() - acknowledged;
                }
                Err(err) => {
                    // nothing is dropped; the queue is retried next pass
                    warn!("Sync push of {} operations failed: {}", outgoing.len(), err);
                    report.failed += outgoing.len();
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        metrics::record_sync_operation("pushed", report.pushed);
        metrics::record_sync_operation("pulled", report.pulled);
        metrics::record_sync_operation("failed", report.failed);
        metrics::record_sync_operation("conflict", report.conflicts_resolved);
        debug!("Sync pass: {:?}", report);
        report
    }

    /// Apply one remote operation. Returns whether it collided with a local one.
    fn receive(&self, remote: SyncOperation) -> NotificationResult<bool> {
        let winner = {
            let mut state = self.state.lock().unwrap();
            let local_timestamp = state
                .queue
                .operations
                .iter()
                .filter(|op| op.notification_id == remote.notification_id)
                .map(|op| op.timestamp)
                .max();
            let Some(local_timestamp) = local_timestamp else {
                drop(state);
                self.apply(&remote)?;
                return Ok(false);
            };

            let winner = match self.settings.strategy {
                ConflictStrategy::Server => ConflictWinner::Remote,
                ConflictStrategy::Client => ConflictWinner::Local,
                ConflictStrategy::LastModified if local_timestamp > remote.timestamp => {
                    ConflictWinner::Local
                }
                ConflictStrategy::LastModified => ConflictWinner::Remote,
            };

            match winner {
                ConflictWinner::Remote => state
                    .queue
                    .operations
                    .retain(|op| op.notification_id != remote.notification_id),
                ConflictWinner::Local => {
                    // re-queue behind everything else so it is pushed after the remote op
                    let (mut kept, rest): (Vec<_>, Vec<_>) = state
                        .queue
                        .operations
                        .drain(..)
                        .partition(|op| op.notification_id == remote.notification_id);
                    state.queue.operations = rest;
                    for op in kept.iter_mut() {
                        op.sequence = state.queue.next_sequence;
                        state.queue.next_sequence += 1;
                    }
                    state.queue.operations.extend(kept);
                }
            }
            self.persist(&state.queue);

            if state.conflicts.len() == MAX_CONFLICT_RECORDS {
                state.conflicts.pop_front();
            }
            state.conflicts.push_back(SyncConflict {
                notification_id: remote.notification_id.clone(),
                local_timestamp,
                remote_timestamp: remote.timestamp,
                remote_device_id: remote.device_id.clone(),
                strategy: self.settings.strategy,
                winner,
                resolved_at: now_millis(),
            });
            winner
        };

        info!(
            "Resolved sync conflict on {} with {} strategy: {:?} wins",
            remote.notification_id,
            self.settings.strategy.as_str(),
            winner
        );
        if winner == ConflictWinner::Remote {
            self.apply(&remote)?;
        }
        Ok(true)
    }

    fn apply(&self, remote: &SyncOperation) -> NotificationResult<()> {
        match remote.op {
            SyncOpKind::Create | SyncOpKind::Update => {
                let snapshot = remote.snapshot.clone().ok_or_else(|| {
                    NotificationError::Validation(format!(
                        "{} of {} carries no snapshot",
                        remote.op.as_str(),
                        remote.notification_id
                    ))
                })?;
                if self.store.contains(&snapshot.id) {
                    let patch = NotificationPatch {
                        read: Some(snapshot.read),
                        group: Some(snapshot.group.clone()),
                        data: snapshot.data.clone(),
                        annotations: Some(snapshot.annotations.clone()),
                        priority: None,
                        notification_type: None,
                    };
                    self.store.update(&snapshot.id, patch)?;
                } else {
                    self.store.add(snapshot)?;
                }
            }
            SyncOpKind::Delete => match self.store.remove(&remote.notification_id) {
                Ok(_) | Err(NotificationError::NotFound(_)) => {}
                Err(err) => return Err(err),
            },
        }
        Ok(())
    }

    /// Realtime mode: keep a connection up, sync on every local change and
    /// heartbeat, reconnect with backoff.
    pub async fn run(&self) {
        let heartbeat = Duration::from_secs(self.settings.heartbeat_interval_secs.max(1));
        info!("Sync engine started for device {}", self.settings.device_id);
        loop {
            self.state.lock().unwrap().connection.connecting();
            match self.transport.connect().await {
                Ok(()) => {
                    self.state.lock().unwrap().connection.connected();
                    info!("Sync connected");
                    if !self.connected_loop(heartbeat).await {
                        break;
                    }
                }
                Err(err) => warn!("Sync connect failed: {}", err),
            }

            let delay = self.state.lock().unwrap().connection.failed();
            let delay = match delay {
                Some(delay) => delay,
                None => {
                    self.state.lock().unwrap().connection.reset_attempts();
                    Duration::from_millis(self.settings.max_reconnect_delay_ms)
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_token.cancelled() => break,
            }
        }
        self.state.lock().unwrap().connection.reset_attempts();
        info!("Sync engine stopped");
    }

    /// Returns false on shutdown, true when the link was lost.
    async fn connected_loop(&self, heartbeat: Duration) -> bool {
        let mut monitor = HeartbeatMonitor::new(heartbeat, now_millis());
        let mut interval = tokio::time::interval(heartbeat);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.transport.heartbeat().await {
                        Ok(()) => monitor.beat(now_millis()),
                        Err(err) => debug!("Sync heartbeat failed: {}", err),
                    }
                    if monitor.should_reconnect(now_millis()) {
                        warn!("Sync heartbeats missed, reconnecting");
                        return true;
                    }
                    self.sync_once().await;
                }
                _ = self.changed.notified() => {
                    self.sync_once().await;
                }
                _ = self.shutdown_token.cancelled() => return false,
            }
        }
    }
}
