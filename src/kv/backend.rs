//! Synchronous string key/value backends.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// A synchronous string store in the shape of browser `localStorage`.
pub trait KvBackend: Send + Sync {
  /// Read the raw text stored under `key`.
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  /// Write `value` under `key`, replacing any prior value.
  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  /// Delete `key`. Deleting a missing key is not an error.
  fn remove_item(&self, key: &str) -> Result<()>;

  /// All keys currently stored.
  fn keys(&self) -> Result<Vec<String>>;
}

/// Bytes a key/value pair counts against a quota.
fn entry_size(key: &str, value: &str) -> usize {
  key.len() + value.len()
}

/// In-memory backend. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryBackend {
  items: Mutex<BTreeMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes that would grow the store past `quota_bytes`.
  pub fn with_quota(mut self, quota_bytes: usize) -> Self {
    self.quota_bytes = Some(quota_bytes);
    self
  }
}

impl KvBackend for MemoryBackend {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(quota) = self.quota_bytes {
      let used: usize = items
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| entry_size(k, v))
        .sum();
      if used + entry_size(key, value) > quota {
        return Err(eyre!("Storage quota of {} bytes exceeded", quota));
      }
    }

    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.keys().cloned().collect())
  }
}

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQLite-backed store that survives restarts.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
  quota_bytes: Option<usize>,
}

impl SqliteBackend {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open key/value store at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// Open a private in-memory store.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory key/value store: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run key/value migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      quota_bytes: None,
    })
  }

  pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
    self.quota_bytes = quota_bytes;
    self
  }
}

impl KvBackend for SqliteBackend {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read key {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(quota) = self.quota_bytes {
      let used: i64 = conn
        .query_row(
          "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
           FROM kv WHERE key != ?",
          params![key],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to measure storage usage: {}", e))?;
      if used as usize + entry_size(key, value) > quota {
        return Err(eyre!("Storage quota of {} bytes exceeded", quota));
      }
    }

    conn
      .execute(
        "INSERT INTO kv (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write key {}: {}", key, e))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove key {}: {}", key, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM kv ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }
}
