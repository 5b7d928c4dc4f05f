//! Push connection manager.
//!
//! Tracks open push connections by user. A user may hold several connections
//! (one per open client); each gets its own outgoing channel and carries the
//! session it was opened with. Notifications are only pushed to connections
//! whose session may read them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::messages::{msg_types, ServerMessage};
use crate::notifications::{now_millis, Notification, NotificationError};
use crate::pubsub::DeliveryCallback;
use crate::security::{check_access, SecurityContext};

const OUTGOING_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    NotConnected,
    Disconnected,
}

#[derive(Clone)]
struct Connection {
    sender: mpsc::Sender<ServerMessage>,
    context: SecurityContext,
}

/// Result of pushing one notification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    /// Connections whose session may not read the notification.
    pub denied: usize,
    pub failed: usize,
}

pub struct ConnectionManager {
    /// user_id -> (connection_id -> connection)
    connections: RwLock<HashMap<String, HashMap<String, Connection>>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection for the session's user. Returns its id and the
    /// receiver the socket task drains.
    pub async fn register(
        &self,
        context: SecurityContext,
    ) -> (String, mpsc::Receiver<ServerMessage>) {
        let (sender, rx) = mpsc::channel(OUTGOING_CAPACITY);
        let connection_id = uuid::Uuid::new_v4().to_string();
        self.connections
            .write()
            .await
            .entry(context.user_id.clone())
            .or_default()
            .insert(connection_id.clone(), Connection { sender, context });
        (connection_id, rx)
    }

    pub async fn unregister(&self, user_id: &str, connection_id: &str) {
        let mut conns = self.connections.write().await;
        if let Some(user_conns) = conns.get_mut(user_id) {
            user_conns.remove(connection_id);
            if user_conns.is_empty() {
                conns.remove(user_id);
            }
        }
    }

    pub async fn send_to_connection(
        &self,
        user_id: &str,
        connection_id: &str,
        message: ServerMessage,
    ) -> Result<(), SendError> {
        let sender = self
            .connections
            .read()
            .await
            .get(user_id)
            .and_then(|user_conns| user_conns.get(connection_id))
            .map(|conn| conn.sender.clone())
            .ok_or(SendError::NotConnected)?;
        sender
            .send(message)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Push a notification to its user's connections, or to every
    /// connection when it is not addressed. Each connection's session is
    /// checked at push time.
    pub async fn push_notification(&self, notification: &Notification, now: i64) -> PushReport {
        let targets: Vec<Connection> = {
            let connections = self.connections.read().await;
            match &notification.user_id {
                Some(user_id) => connections
                    .get(user_id)
                    .map(|user_conns| user_conns.values().cloned().collect())
                    .unwrap_or_default(),
                None => connections
                    .values()
                    .flat_map(|user_conns| user_conns.values().cloned())
                    .collect(),
            }
        };
        let message = ServerMessage::new(msg_types::NOTIFICATION, notification);
        let mut report = PushReport::default();
        for conn in targets {
            if let Err(err) = check_access(&conn.context, notification, now) {
                debug!("Not pushing {} to {}: {}", notification.id, conn.context.user_id, err);
                report.denied += 1;
                continue;
            }
            if conn.sender.send(message.clone()).await.is_err() {
                report.failed += 1;
            } else {
                report.delivered += 1;
            }
        }
        report
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(user_id)
            .map(|user_conns| user_conns.len())
            .unwrap_or(0)
    }

    pub async fn total_connections(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .map(|user_conns| user_conns.len())
            .sum()
    }

    pub async fn connected_user_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

/// Pub/sub subscriber that pushes notifications to open connections:
/// addressed ones to their user, the rest to everybody.
pub struct PushCallback {
    connections: Arc<ConnectionManager>,
}

impl PushCallback {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl DeliveryCallback for PushCallback {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let report = self
            .connections
            .push_notification(notification, now_millis())
            .await;
        if report.failed > 0 {
            debug!("Push of {} missed {} closed connections", notification.id, report.failed);
        }
        Ok(())
    }
}
