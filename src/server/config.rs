use super::RequestsLoggingLevel;
use crate::security::AccessPolicy;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub requests_logging_level: RequestsLoggingLevel,
    /// Period of `{type:"heartbeat"}` frames on the push channel.
    pub heartbeat_interval_secs: u64,
    /// Sessions opened for the user named in a route or push connection.
    pub access: AccessPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3100,
            requests_logging_level: RequestsLoggingLevel::default(),
            heartbeat_interval_secs: 30,
            access: AccessPolicy::default(),
        }
    }
}
