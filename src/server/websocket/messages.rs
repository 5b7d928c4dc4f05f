//! Push channel message types.
//!
//! Every frame is a JSON object `{type, data}`. `data` is omitted for
//! messages that carry nothing, such as heartbeats.

use serde::{Deserialize, Serialize};

/// Server -> client frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn heartbeat() -> Self {
        Self::empty(msg_types::HEARTBEAT)
    }
}

/// Client -> server frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub mod system {
    use serde::{Deserialize, Serialize};

    /// First frame after the upgrade.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Connected {
        pub connection_id: String,
        pub server_version: String,
        pub heartbeat_interval_secs: u64,
    }

    /// Client acknowledgement of delivered notifications; marks them read.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Ack {
        pub ids: Vec<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Error {
        pub code: String,
        pub message: String,
    }

    impl Error {
        pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                code: code.into(),
                message: message.into(),
            }
        }
    }
}

pub mod msg_types {
    pub const CONNECTED: &str = "connected";
    pub const NOTIFICATION: &str = "notification";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ACK: &str = "ack";
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{Notification, NotificationType, Priority};

    #[test]
    fn heartbeat_has_no_data() {
        let json = serde_json::to_string(&ServerMessage::heartbeat()).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn notification_frame_carries_record() {
        let n = Notification::new(NotificationType::NftSold, Priority::High, "Sold", "Ape #3");
        let msg = ServerMessage::new(msg_types::NOTIFICATION, &n);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["id"], n.id);
        assert_eq!(value["data"]["type"], "NFT_SOLD");
    }

    #[test]
    fn client_message_data_is_optional() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.msg_type, msg_types::PING);
        assert!(msg.data.is_null());

        let ack: ClientMessage =
            serde_json::from_str(r#"{"type":"ack","data":{"ids":["a","b"]}}"#).unwrap();
        let parsed: system::Ack = serde_json::from_value(ack.data).unwrap();
        assert_eq!(parsed.ids, vec!["a", "b"]);
    }
}
