use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::KeyValueStore;
use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema, BASE_DB_VERSION, DEFAULT_TIMESTAMP};

const KV_TABLE_V_0: Table = Table {
    name: "kv_entries",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

const KV_TABLE_V_1: Table = Table {
    name: "kv_entries",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_kv_entries_updated_at", "updated_at")],
};

fn migrate_to_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "ALTER TABLE kv_entries ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_kv_entries_updated_at ON kv_entries(updated_at);",
        [],
    )?;
    Ok(())
}

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[KV_TABLE_V_0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[KV_TABLE_V_1],
        migration: Some(migrate_to_v1),
    },
];

/// SQLite-backed key-value store.
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyValueStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open(db_path.as_ref())
                .with_context(|| format!("Failed to open {:?}", db_path.as_ref()))?
        } else {
            let conn = Connection::open(db_path.as_ref())
                .with_context(|| format!("Failed to create {:?}", db_path.as_ref()))?;
            VERSIONED_SCHEMAS
                .last()
                .context("No schema defined")?
                .create(&conn)?;
            conn
        };
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        VERSIONED_SCHEMAS
            .last()
            .context("No schema defined")?
            .create(&conn)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;
        if version >= VERSIONED_SCHEMAS.len() {
            bail!("Database version {} is too new", version);
        }
        VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteKeyValueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, version: usize) -> Result<()> {
        let mut latest_from = version;
        for schema in VERSIONED_SCHEMAS.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating kv db from version {} to {}",
                    latest_from, schema.version
                );
                migration_fn(conn)?;
                latest_from = schema.version;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM kv_entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read key {}", key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().timestamp()],
        )
        .with_context(|| format!("Failed to write key {}", key))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn
            .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to delete key {}", key))?;
        Ok(removed > 0)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT key FROM kv_entries WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.db");
        {
            let store = SqliteKeyValueStore::new(&path).unwrap();
            store.set("notifications:1", "{}").unwrap();
            store.set("notifications:1", "{\"v\":2}").unwrap();
        }
        let store = SqliteKeyValueStore::new(&path).unwrap();
        assert_eq!(
            store.get("notifications:1").unwrap().as_deref(),
            Some("{\"v\":2}")
        );
    }

    #[test]
    fn test_keys_with_prefix() {
        let store = SqliteKeyValueStore::in_memory().unwrap();
        store.set("sync:queue:a", "[]").unwrap();
        store.set("sync:queue:b", "[]").unwrap();
        store.set("notifications:x", "{}").unwrap();

        assert_eq!(
            store.keys("sync:queue:").unwrap(),
            vec!["sync:queue:a", "sync:queue:b"]
        );
        assert!(store.delete("sync:queue:a").unwrap());
        assert_eq!(store.keys("sync:").unwrap(), vec!["sync:queue:b"]);
    }

    #[test]
    fn test_migrates_v0_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            VERSIONED_SCHEMAS[0].create(&conn).unwrap();
            conn.execute(
                "INSERT INTO kv_entries (key, value) VALUES ('a', '1')",
                [],
            )
            .unwrap();
        }
        let store = SqliteKeyValueStore::new(&path).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.set("b", "2").unwrap();

        let conn = store.conn.lock().unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION + 1);
        VERSIONED_SCHEMAS[1].validate(&conn).unwrap();
    }

    #[test]
    fn test_rejects_foreign_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreign.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("CREATE TABLE other (id INTEGER)", []).unwrap();
        }
        assert!(SqliteKeyValueStore::new(&path).is_err());
    }
}
