use axum::extract::FromRef;

use crate::manager::NotificationManager;
use crate::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Instant;

use super::websocket::ConnectionManager;
use super::ServerConfig;

pub type GuardedManager = Arc<NotificationManager>;
pub type GuardedConnectionManager = Arc<ConnectionManager>;
pub type OptionalScheduler = Option<Arc<Scheduler>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub manager: GuardedManager,
    pub ws_connection_manager: GuardedConnectionManager,
    pub scheduler: OptionalScheduler,
}

impl FromRef<ServerState> for GuardedManager {
    fn from_ref(input: &ServerState) -> Self {
        input.manager.clone()
    }
}

impl FromRef<ServerState> for GuardedConnectionManager {
    fn from_ref(input: &ServerState) -> Self {
        input.ws_connection_manager.clone()
    }
}

impl FromRef<ServerState> for OptionalScheduler {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
