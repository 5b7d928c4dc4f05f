//! Key-value persistence backends.

mod memory;
mod sqlite;
mod trait_def;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

pub use memory::InMemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;
pub use trait_def::KeyValueStore;

/// Read and deserialize a JSON value.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupted value under key {}", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Serialize a value as JSON and write it.
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).context("Failed to serialize value")?;
    store.set(key, &raw)
}
