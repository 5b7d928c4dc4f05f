//! Payload encryption at rest and type-based access control.

mod access;
mod crypto;

pub use access::{
    check_access, check_permissions, check_session, decrypt_for, required_permission,
    AccessPolicy, SecurityContext, READ_NFT, READ_PERMISSIONS, READ_SECURITY, READ_SYSTEM,
    READ_TOKEN,
};
pub use crypto::{
    is_encrypted, CryptoError, EncryptedPayload, NotificationCipher, ENCRYPTED_PLACEHOLDER,
    PAYLOAD_VERSION,
};

#[cfg(test)]
pub(crate) use crypto::test_settings;
