//! Push channel route handler.
//!
//! Handles the upgrade, the heartbeat task, the message loop and cleanup.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{
    connection::ConnectionManager,
    messages::{msg_types, system, ClientMessage, ServerMessage},
};
use crate::manager::NotificationManager;
use crate::notifications::now_millis;
use crate::security::SecurityContext;
use crate::server::state::{GuardedConnectionManager, GuardedManager};
use crate::server::ServerConfig;

struct WsState {
    connection_manager: Arc<ConnectionManager>,
    manager: Arc<NotificationManager>,
    heartbeat_interval: Duration,
    /// Session opened at upgrade time, used for pushes and acks.
    context: SecurityContext,
}

/// `GET /ws/{user}`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(connection_manager): State<GuardedConnectionManager>,
    State(manager): State<GuardedManager>,
    State(config): State<ServerConfig>,
) -> Response {
    let state = Arc::new(WsState {
        connection_manager,
        manager,
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
        context: config.access.context_for(&user_id, now_millis()),
    });
    debug!("Push channel upgrade for user {}", user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: Arc<WsState>) {
    let (connection_id, outgoing_rx) = state
        .connection_manager
        .register(state.context.clone())
        .await;
    debug!("Push channel connected: user {} ({})", user_id, connection_id);

    let (ws_sink, ws_stream) = socket.split();

    let connected_msg = ServerMessage::new(
        msg_types::CONNECTED,
        system::Connected {
            connection_id: connection_id.clone(),
            server_version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
            heartbeat_interval_secs: state.heartbeat_interval.as_secs(),
        },
    );

    let outgoing_handle = tokio::spawn(forward_outgoing(ws_sink, outgoing_rx, connected_msg));
    let heartbeat_handle = tokio::spawn(send_heartbeats(
        state.connection_manager.clone(),
        user_id.clone(),
        connection_id.clone(),
        state.heartbeat_interval,
    ));

    process_incoming(ws_stream, &user_id, &connection_id, &state).await;

    debug!("Push channel disconnected: user {} ({})", user_id, connection_id);
    heartbeat_handle.abort();
    outgoing_handle.abort();
    state
        .connection_manager
        .unregister(&user_id, &connection_id)
        .await;
}

async fn forward_outgoing(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outgoing_rx: mpsc::Receiver<ServerMessage>,
    initial_msg: ServerMessage,
) {
    if let Ok(json) = serde_json::to_string(&initial_msg) {
        if ws_sink.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    while let Some(msg) = outgoing_rx.recv().await {
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if ws_sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to serialize push message: {}", e);
            }
        }
    }
}

async fn send_heartbeats(
    connections: Arc<ConnectionManager>,
    user_id: String,
    connection_id: String,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    // first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        if connections
            .send_to_connection(&user_id, &connection_id, ServerMessage::heartbeat())
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn process_incoming(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    user_id: &str,
    connection_id: &str,
    state: &WsState,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(user_id, connection_id, msg, state).await,
                Err(e) => {
                    debug!("Failed to parse client message: {}", e);
                    reply(
                        state,
                        user_id,
                        connection_id,
                        error_message("parse_error", format!("Invalid message format: {}", e)),
                    )
                    .await;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Push channel error: {}", e);
                break;
            }
        }
    }
}

async fn handle_client_message(
    user_id: &str,
    connection_id: &str,
    msg: ClientMessage,
    state: &WsState,
) {
    match msg.msg_type.as_str() {
        msg_types::PING => {
            reply(state, user_id, connection_id, ServerMessage::empty(msg_types::PONG)).await;
        }
        msg_types::HEARTBEAT => {}
        msg_types::ACK => {
            let response = match serde_json::from_value::<system::Ack>(msg.data) {
                Ok(ack) => match state.manager.mark_as_read_for(&ack.ids, &state.context) {
                    Ok(read) => {
                        debug!("User {} acknowledged {} notifications", user_id, read.len());
                        None
                    }
                    Err(err) => Some(error_message(err.code(), err.to_string())),
                },
                Err(e) => Some(error_message("parse_error", format!("Invalid ack: {}", e))),
            };
            if let Some(response) = response {
                reply(state, user_id, connection_id, response).await;
            }
        }
        other => {
            debug!("Unknown message type: {}", other);
            reply(
                state,
                user_id,
                connection_id,
                error_message("unknown_type", format!("Unknown message type: {}", other)),
            )
            .await;
        }
    }
}

fn error_message(code: impl Into<String>, message: impl Into<String>) -> ServerMessage {
    ServerMessage::new(msg_types::ERROR, system::Error::new(code, message))
}

async fn reply(state: &WsState, user_id: &str, connection_id: &str, message: ServerMessage) {
    let _ = state
        .connection_manager
        .send_to_connection(user_id, connection_id, message)
        .await;
}
