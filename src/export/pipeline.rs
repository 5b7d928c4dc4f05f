use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{csv, json, xml};
use crate::notifications::{
    Notification, NotificationError, NotificationFilter, NotificationResult,
};
use crate::security::{EncryptedPayload, NotificationCipher};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const REQUIRED_FIELDS: [&str; 6] = ["id", "type", "priority", "title", "message", "timestamp"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Xml,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xml => "application/xml",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub filter: NotificationFilter,
    /// JSON only: wrap records in a versioned envelope with a checksum.
    pub include_metadata: bool,
    pub compress: bool,
    pub encrypt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportOptions {
    pub format: ExportFormat,
    pub encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    /// Position of the record in the import, 0-based.
    pub index: usize,
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportOutcome {
    /// Parsed records with their position in the import.
    pub notifications: Vec<(usize, Notification)>,
    pub errors: Vec<RecordError>,
}

/// filter -> serialize -> metadata -> gzip -> encrypt
pub fn export(
    notifications: &[Notification],
    options: &ExportOptions,
    cipher: Option<&NotificationCipher>,
    now: i64,
) -> NotificationResult<Vec<u8>> {
    let selected: Vec<Notification> = notifications
        .iter()
        .filter(|n| options.filter.matches(n))
        .cloned()
        .collect();

    let text = match options.format {
        ExportFormat::Json => json::write(&selected, options.include_metadata, now)
            .map_err(|err| NotificationError::Export(err.to_string()))?,
        ExportFormat::Csv => csv::write(&selected),
        ExportFormat::Xml => xml::write(&selected),
    };
    let mut bytes = text.into_bytes();

    if options.compress {
        let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
        encoder
            .write_all(&bytes)
            .map_err(|err| NotificationError::Export(format!("gzip write failed: {}", err)))?;
        bytes = encoder
            .finish()
            .map_err(|err| NotificationError::Export(format!("gzip finish failed: {}", err)))?;
    }

    if options.encrypt {
        let cipher = cipher.ok_or_else(|| {
            NotificationError::Encryption("no encryption passphrase configured".into())
        })?;
        let payload = cipher.encrypt(&bytes)?;
        bytes = serde_json::to_vec(&payload)
            .map_err(|err| NotificationError::Export(err.to_string()))?;
    }

    debug!(
        "Exported {} notifications as {:?} ({} bytes)",
        selected.len(),
        options.format,
        bytes.len()
    );
    Ok(bytes)
}

/// decrypt -> gunzip -> parse -> validate each record
///
/// Document-level failures abort; bad records are collected in
/// `ImportOutcome::errors` and skipped.
pub fn import(
    input: &[u8],
    options: &ImportOptions,
    cipher: Option<&NotificationCipher>,
) -> NotificationResult<ImportOutcome> {
    let mut bytes = input.to_vec();

    if options.encrypted {
        let cipher = cipher.ok_or_else(|| {
            NotificationError::Decryption("no encryption passphrase configured".into())
        })?;
        let payload: EncryptedPayload = serde_json::from_slice(&bytes)
            .map_err(|err| NotificationError::Import(format!("invalid encrypted envelope: {}", err)))?;
        bytes = cipher.decrypt(&payload)?;
    }

    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|err| NotificationError::Import(format!("gzip decompress failed: {}", err)))?;
        bytes = decompressed;
    }

    let text = String::from_utf8(bytes)
        .map_err(|_| NotificationError::Import("input is not valid UTF-8".into()))?;
    let records = match options.format {
        ExportFormat::Json => json::read(&text),
        ExportFormat::Csv => csv::read(&text),
        ExportFormat::Xml => xml::read(&text),
    }
    .map_err(NotificationError::Import)?;

    let mut outcome = ImportOutcome::default();
    for (index, record) in records.into_iter().enumerate() {
        let id = record
            .as_ref()
            .ok()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        match record.and_then(to_notification) {
            Ok(notification) => outcome.notifications.push((index, notification)),
            Err(message) => outcome.errors.push(RecordError { index, id, message }),
        }
    }
    if !outcome.errors.is_empty() {
        warn!(
            "Import skipped {} of {} records",
            outcome.errors.len(),
            outcome.errors.len() + outcome.notifications.len()
        );
    }
    Ok(outcome)
}

fn to_notification(record: Value) -> Result<Notification, String> {
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .filter(|field| record.get(**field).map(Value::is_null).unwrap_or(true))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing required fields: {}", missing.join(", ")));
    }
    let notification: Notification =
        serde_json::from_value(record).map_err(|err| err.to_string())?;
    notification.validate().map_err(|err| err.to_string())?;
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{NotificationType, Priority};
    use crate::security::test_settings;
    use serde_json::json;

    fn sample() -> Vec<Notification> {
        vec![
            Notification::new(NotificationType::NftSold, Priority::High, "Sold", "Ape #1")
                .with_group("nft")
                .with_data(json!({"price": "2.5"})),
            Notification::new(NotificationType::System, Priority::Low, "Maintenance", "at 2am"),
        ]
    }

    #[test]
    fn test_filter_applies_before_serialization() {
        let options = ExportOptions {
            format: ExportFormat::Json,
            filter: NotificationFilter::by_type(NotificationType::System),
            ..Default::default()
        };
        let bytes = export(&sample(), &options, None, 0).unwrap();
        let outcome = import(&bytes, &ImportOptions::default(), None).unwrap();
        assert_eq!(outcome.notifications.len(), 1);
        assert_eq!(outcome.notifications[0].1.title, "Maintenance");
    }

    #[test]
    fn test_every_format_imports_what_it_exports() {
        let notifications = sample();
        for format in [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Xml] {
            let options = ExportOptions {
                format,
                ..Default::default()
            };
            let bytes = export(&notifications, &options, None, 0).unwrap();
            let outcome = import(
                &bytes,
                &ImportOptions {
                    format,
                    encrypted: false,
                },
                None,
            )
            .unwrap();
            assert!(outcome.errors.is_empty(), "{:?}: {:?}", format, outcome.errors);
            assert_eq!(outcome.notifications[0].1.id, notifications[0].id);
            assert_eq!(outcome.notifications[0].1.group.as_deref(), Some("nft"));
            assert_eq!(outcome.notifications[0].1.data, notifications[0].data);
        }
    }

    #[test]
    fn test_full_pipeline_with_gzip_and_encryption() {
        let cipher = NotificationCipher::new("export-pass", &test_settings()).unwrap();
        let options = ExportOptions {
            format: ExportFormat::Csv,
            include_metadata: false,
            compress: true,
            encrypt: true,
            ..Default::default()
        };
        let bytes = export(&sample(), &options, Some(&cipher), 0).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("Maintenance"));

        let import_options = ImportOptions {
            format: ExportFormat::Csv,
            encrypted: true,
        };
        let outcome = import(&bytes, &import_options, Some(&cipher)).unwrap();
        assert_eq!(outcome.notifications.len(), 2);

        let wrong = NotificationCipher::new("nope", &test_settings()).unwrap();
        let err = import(&bytes, &import_options, Some(&wrong)).unwrap_err();
        assert_eq!(err.code(), "DECRYPTION_ERROR");
        assert!(export(&sample(), &options, None, 0).is_err());
    }

    #[test]
    fn test_import_collects_record_errors() {
        let input = json!([
            {"id": "ok", "type": "SYSTEM", "priority": "LOW", "title": "t", "message": "m", "timestamp": 5},
            {"id": "no-title", "type": "SYSTEM", "priority": "LOW", "message": "m", "timestamp": 5},
            {"id": "bad-type", "type": "FAX", "priority": "LOW", "title": "t", "message": "m", "timestamp": 5},
            {"id": "", "type": "SYSTEM", "priority": "LOW", "title": "t", "message": "m", "timestamp": 5}
        ])
        .to_string();
        let outcome = import(input.as_bytes(), &ImportOptions::default(), None).unwrap();
        assert_eq!(outcome.notifications.len(), 1);
        assert_eq!(outcome.notifications[0].0, 0);
        assert_eq!(outcome.errors.len(), 3);
        assert_eq!(outcome.errors[0].index, 1);
        assert_eq!(outcome.errors[0].id.as_deref(), Some("no-title"));
        assert!(outcome.errors[0].message.contains("title"));
    }

    #[test]
    fn test_document_errors_abort() {
        let err = import(b"not json", &ImportOptions::default(), None).unwrap_err();
        assert_eq!(err.code(), "IMPORT_ERROR");
    }
}
