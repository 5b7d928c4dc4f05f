use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::crypto::NotificationCipher;
use crate::config::SecuritySettings;
use crate::notifications::{Notification, NotificationError, NotificationResult, NotificationType};

pub const READ_NFT: &str = "read:nft";
pub const READ_TOKEN: &str = "read:token";
pub const READ_SECURITY: &str = "read:security";
pub const READ_SYSTEM: &str = "read:system";

pub const READ_PERMISSIONS: [&str; 4] = [READ_NFT, READ_TOKEN, READ_SECURITY, READ_SYSTEM];

/// Permission needed to read a notification of the given type.
pub fn required_permission(notification_type: NotificationType) -> &'static str {
    match notification_type {
        NotificationType::NftListed | NotificationType::NftSold | NotificationType::NftBid => {
            READ_NFT
        }
        NotificationType::TokenTransfer | NotificationType::PriceAlert => READ_TOKEN,
        NotificationType::Security => READ_SECURITY,
        NotificationType::System | NotificationType::Custom => READ_SYSTEM,
    }
}

/// Who is asking, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub user_id: String,
    pub permissions: BTreeSet<String>,
    /// Unix ms.
    pub session_expires_at: i64,
    pub device_trusted: bool,
}

impl SecurityContext {
    pub fn new(user_id: impl Into<String>, session_expires_at: i64) -> Self {
        Self {
            user_id: user_id.into(),
            permissions: BTreeSet::new(),
            session_expires_at,
            device_trusted: true,
        }
    }

    pub fn grant(mut self, permission: &str) -> Self {
        self.permissions.insert(permission.to_string());
        self
    }

    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// What the server grants a caller it has identified by user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub permissions: BTreeSet<String>,
    pub session_ttl_ms: i64,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::from_settings(&SecuritySettings::default())
    }
}

impl AccessPolicy {
    pub fn from_settings(settings: &SecuritySettings) -> Self {
        Self {
            permissions: settings.permissions.iter().cloned().collect(),
            session_ttl_ms: settings.session_ttl_secs.saturating_mul(1000) as i64,
        }
    }

    /// Session for `user_id` starting at `now`.
    pub fn context_for(&self, user_id: &str, now: i64) -> SecurityContext {
        SecurityContext {
            user_id: user_id.to_string(),
            permissions: self.permissions.clone(),
            session_expires_at: now.saturating_add(self.session_ttl_ms),
            device_trusted: true,
        }
    }
}

pub fn check_permissions(
    context: &SecurityContext,
    notification: &Notification,
) -> NotificationResult<()> {
    let permission = required_permission(notification.notification_type);
    if context.has(permission) {
        return Ok(());
    }
    warn!(
        "User {} lacks {} for notification {}",
        context.user_id, permission, notification.id
    );
    Err(NotificationError::AccessDenied(format!(
        "{} required",
        permission
    )))
}

pub fn check_session(context: &SecurityContext, now: i64) -> NotificationResult<()> {
    if context.session_expires_at <= now {
        return Err(NotificationError::AccessDenied(format!(
            "session of {} expired",
            context.user_id
        )));
    }
    if !context.device_trusted {
        return Err(NotificationError::AccessDenied(format!(
            "device of {} is not trusted",
            context.user_id
        )));
    }
    Ok(())
}

/// Session, device and type permission, in that order.
pub fn check_access(
    context: &SecurityContext,
    notification: &Notification,
    now: i64,
) -> NotificationResult<()> {
    check_session(context, now)?;
    check_permissions(context, notification)
}

/// Decrypt a notification on behalf of `context`, after checking the
/// session, the device and the type permission.
pub fn decrypt_for(
    context: &SecurityContext,
    cipher: &NotificationCipher,
    notification: &Notification,
    now: i64,
) -> NotificationResult<Notification> {
    check_access(context, notification, now)?;
    Ok(cipher.decrypt_notification(notification)?)
}
