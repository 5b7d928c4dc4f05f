use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::notifications::Notification;

pub const ENVELOPE_VERSION: u32 = 1;

/// JSON export with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub version: u32,
    /// Unix ms.
    pub exported_at: i64,
    pub count: usize,
    /// Hex SHA-256 of the serialized `notifications` array.
    pub checksum: String,
    pub notifications: Vec<Value>,
}

pub fn checksum(records: &[Value]) -> String {
    let bytes = serde_json::to_vec(records).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn write(
    notifications: &[Notification],
    with_metadata: bool,
    now: i64,
) -> serde_json::Result<String> {
    if !with_metadata {
        return serde_json::to_string_pretty(notifications);
    }
    let records = notifications
        .iter()
        .map(serde_json::to_value)
        .collect::<serde_json::Result<Vec<Value>>>()?;
    let envelope = ExportEnvelope {
        version: ENVELOPE_VERSION,
        exported_at: now,
        count: records.len(),
        checksum: checksum(&records),
        notifications: records,
    };
    serde_json::to_string_pretty(&envelope)
}

/// Records from either a bare array or an envelope. Envelopes are checked
/// against their count and checksum.
pub fn read(input: &str) -> Result<Vec<Result<Value, String>>, String> {
    let document: Value =
        serde_json::from_str(input).map_err(|err| format!("invalid JSON: {}", err))?;
    let records = match document {
        Value::Array(records) => records,
        Value::Object(_) => {
            let envelope: ExportEnvelope = serde_json::from_value(document)
                .map_err(|err| format!("invalid export envelope: {}", err))?;
            if envelope.version > ENVELOPE_VERSION {
                return Err(format!("unsupported export version {}", envelope.version));
            }
            if envelope.count != envelope.notifications.len() {
                return Err(format!(
                    "envelope declares {} records but holds {}",
                    envelope.count,
                    envelope.notifications.len()
                ));
            }
            if checksum(&envelope.notifications) != envelope.checksum {
                return Err("checksum mismatch".to_string());
            }
            envelope.notifications
        }
        _ => return Err("expected an array or an export envelope".to_string()),
    };
    Ok(records
        .into_iter()
        .map(|record| match record {
            Value::Object(_) => Ok(record),
            other => Err(format!("expected an object, found {}", other)),
        })
        .collect())
}
