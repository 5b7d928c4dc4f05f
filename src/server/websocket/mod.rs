//! Push channel over WebSocket.

pub mod connection;
pub mod handler;
pub mod messages;

pub use connection::{ConnectionManager, PushCallback, PushReport, SendError};
pub use handler::ws_handler;
pub use messages::{msg_types, ClientMessage, ServerMessage};
