use anyhow::Result;

/// Minimal string key-value persistence used by the store, sync queues and
/// user preferences.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns true if a value was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, sorted ascending.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
