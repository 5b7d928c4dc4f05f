//! AES-256-GCM encryption of notification payloads.
//!
//! Keys are derived with Argon2id from a passphrase and a random 16-byte
//! salt; every message gets its own salt and 12-byte nonce. The envelope is
//! serialized as:
//! ```json
//! { "salt": "<base64>", "nonce": "<base64>", "ciphertext": "<base64>", "version": 1 }
//! ```

use std::num::NonZeroUsize;
use std::sync::Mutex;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lru::LruCache;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SecuritySettings;
use crate::notifications::{Notification, NotificationError};

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
pub const PAYLOAD_VERSION: u8 = 1;

/// Shown in place of title and message while a notification is encrypted.
pub const ENCRYPTED_PLACEHOLDER: &str = "[encrypted]";
/// Annotation marking the encrypted form.
pub const ENCRYPTION_ANNOTATION: &str = "encryption";
const ENCRYPTION_SCHEME: &str = "aes-256-gcm";

/// Derived keys kept per salt so repeated reads of a record skip Argon2.
const KEY_CACHE_SIZE: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("malformed payload: {0}")]
    Encoding(String),
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),
}

impl From<CryptoError> for NotificationError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyDerivation(_) | CryptoError::Encrypt(_) => {
                NotificationError::Encryption(err.to_string())
            }
            CryptoError::Decrypt(_)
            | CryptoError::Encoding(_)
            | CryptoError::UnsupportedVersion(_) => NotificationError::Decryption(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    pub version: u8,
}

/// The fields hidden by encryption.
#[derive(Debug, Serialize, Deserialize)]
struct SealedFields {
    title: String,
    message: String,
    data: Option<serde_json::Value>,
}

pub struct NotificationCipher {
    passphrase: String,
    params: Params,
    keys: Mutex<LruCache<[u8; SALT_SIZE], [u8; KEY_SIZE]>>,
}

impl NotificationCipher {
    pub fn new(passphrase: impl Into<String>, settings: &SecuritySettings) -> Result<Self, CryptoError> {
        let params = Params::new(
            settings.argon2_memory_kib,
            settings.argon2_iterations,
            1,
            Some(KEY_SIZE),
        )
        .map_err(|err| CryptoError::KeyDerivation(err.to_string()))?;
        let cache_size = NonZeroUsize::new(KEY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            passphrase: passphrase.into(),
            params,
            keys: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Cipher from settings, if a passphrase is configured.
    pub fn from_settings(settings: &SecuritySettings) -> Result<Option<Self>, CryptoError> {
        settings
            .encryption_passphrase
            .as_ref()
            .map(|passphrase| Self::new(passphrase.clone(), settings))
            .transpose()
    }

    fn derive_key(&self, salt: &[u8; SALT_SIZE]) -> Result<[u8; KEY_SIZE], CryptoError> {
        if let Some(key) = self.keys.lock().unwrap().get(salt) {
            return Ok(*key);
        }
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let mut key = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|err| CryptoError::KeyDerivation(err.to_string()))?;
        self.keys.lock().unwrap().put(*salt, key);
        Ok(key)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        let mut rng = rand::rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|err| CryptoError::Encrypt(err.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|err| CryptoError::Encrypt(err.to_string()))?;

        Ok(EncryptedPayload {
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
            version: PAYLOAD_VERSION,
        })
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError> {
        if payload.version != PAYLOAD_VERSION {
            return Err(CryptoError::UnsupportedVersion(payload.version));
        }
        let salt: [u8; SALT_SIZE] = decode_fixed(&payload.salt, "salt")?;
        let nonce_bytes: [u8; NONCE_SIZE] = decode_fixed(&payload.nonce, "nonce")?;
        let ciphertext = BASE64
            .decode(&payload.ciphertext)
            .map_err(|err| CryptoError::Encoding(format!("ciphertext: {}", err)))?;

        let key = self.derive_key(&salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|err| CryptoError::Decrypt(err.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt("authentication failed".into()))
    }

    /// Replace title, message and data with an encrypted envelope.
    pub fn encrypt_notification(
        &self,
        notification: &Notification,
    ) -> Result<Notification, CryptoError> {
        if is_encrypted(notification) {
            return Ok(notification.clone());
        }
        let sealed = SealedFields {
            title: notification.title.clone(),
            message: notification.message.clone(),
            data: notification.data.clone(),
        };
        let plaintext =
            serde_json::to_vec(&sealed).map_err(|err| CryptoError::Encrypt(err.to_string()))?;
        let payload = self.encrypt(&plaintext)?;

        let mut encrypted = notification.clone();
        encrypted.title = ENCRYPTED_PLACEHOLDER.to_string();
        encrypted.message = ENCRYPTED_PLACEHOLDER.to_string();
        encrypted.data =
            Some(serde_json::to_value(&payload).map_err(|err| CryptoError::Encrypt(err.to_string()))?);
        encrypted.annotations.insert(
            ENCRYPTION_ANNOTATION.to_string(),
            ENCRYPTION_SCHEME.to_string(),
        );
        Ok(encrypted)
    }

    /// Inverse of `encrypt_notification`. Plain notifications pass through.
    pub fn decrypt_notification(
        &self,
        notification: &Notification,
    ) -> Result<Notification, CryptoError> {
        if !is_encrypted(notification) {
            return Ok(notification.clone());
        }
        let payload: EncryptedPayload = notification
            .data
            .clone()
            .ok_or_else(|| CryptoError::Encoding("missing envelope".into()))
            .and_then(|data| {
                serde_json::from_value(data).map_err(|err| CryptoError::Encoding(err.to_string()))
            })?;
        let plaintext = self.decrypt(&payload)?;
        let sealed: SealedFields = serde_json::from_slice(&plaintext)
            .map_err(|err| CryptoError::Encoding(err.to_string()))?;

        let mut decrypted = notification.clone();
        decrypted.title = sealed.title;
        decrypted.message = sealed.message;
        decrypted.data = sealed.data;
        decrypted.annotations.remove(ENCRYPTION_ANNOTATION);
        Ok(decrypted)
    }
}

pub fn is_encrypted(notification: &Notification) -> bool {
    notification
        .annotations
        .get(ENCRYPTION_ANNOTATION)
        .map(|scheme| scheme == ENCRYPTION_SCHEME)
        .unwrap_or(false)
}

fn decode_fixed<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|err| CryptoError::Encoding(format!("{}: {}", what, err)))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::Encoding(format!("{} must be {} bytes", what, N)))
}

#[cfg(test)]
pub(crate) fn test_settings() -> SecuritySettings {
    SecuritySettings {
        encryption_passphrase: None,
        argon2_memory_kib: 1_024,
        argon2_iterations: 1,
        ..SecuritySettings::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{NotificationType, Priority};
    use serde_json::json;

    fn cipher(passphrase: &str) -> NotificationCipher {
        NotificationCipher::new(passphrase, &test_settings()).unwrap()
    }

    fn secret() -> Notification {
        Notification::new(
            NotificationType::Security,
            Priority::Urgent,
            "New login",
            "Login from 10.0.0.1",
        )
        .with_data(json!({"ip": "10.0.0.1"}))
    }

    #[test]
    fn test_notification_encrypt_decrypt() {
        let cipher = cipher("correct horse");
        let original = secret();
        let encrypted = cipher.encrypt_notification(&original).unwrap();

        assert!(is_encrypted(&encrypted));
        assert_eq!(encrypted.title, ENCRYPTED_PLACEHOLDER);
        assert_eq!(encrypted.id, original.id);
        assert!(!encrypted.data.as_ref().unwrap().to_string().contains("10.0.0.1"));

        assert_eq!(cipher.decrypt_notification(&encrypted).unwrap(), original);
    }

    #[test]
    fn test_wrong_passphrase_is_decryption_error() {
        let encrypted = cipher("right").encrypt_notification(&secret()).unwrap();
        let err = cipher("wrong").decrypt_notification(&encrypted).unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt(_)));
        assert_eq!(NotificationError::from(err).code(), "DECRYPTION_ERROR");
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_message() {
        let cipher = cipher("pw");
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(BASE64.decode(&a.salt).unwrap().len(), 16);
        assert_eq!(BASE64.decode(&a.nonce).unwrap().len(), 12);
    }

    #[test]
    fn test_tampered_or_foreign_payloads_rejected() {
        let cipher = cipher("pw");
        let mut payload = cipher.encrypt(b"data").unwrap();
        payload.version = 9;
        assert_eq!(
            cipher.decrypt(&payload).unwrap_err(),
            CryptoError::UnsupportedVersion(9)
        );

        let mut payload = cipher.encrypt(b"data").unwrap();
        payload.nonce = BASE64.encode([0u8; 4]);
        assert!(matches!(
            cipher.decrypt(&payload).unwrap_err(),
            CryptoError::Encoding(_)
        ));
    }

    #[test]
    fn test_plain_notification_passes_through_decrypt() {
        let cipher = cipher("pw");
        let plain = secret();
        assert_eq!(cipher.decrypt_notification(&plain).unwrap(), plain);
    }
}
