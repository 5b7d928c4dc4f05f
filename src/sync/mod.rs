//! Multi-device reconciliation of notification state.

mod connection;
mod engine;
mod models;
mod transport;

pub use connection::{
    ConnectionState, ConnectionStateMachine, HeartbeatMonitor, ReconnectPolicy,
    MISSED_HEARTBEATS_BEFORE_RECONNECT,
};
pub use engine::SyncEngine;
pub use models::{
    ConflictStrategy, ConflictWinner, SyncConflict, SyncOpKind, SyncOperation, SyncReport,
};
pub use transport::{HubTransport, SyncHub, SyncTransport};
