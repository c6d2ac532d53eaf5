//! Named response caches persisted in SQLite.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Mutex;

use super::types::{Request, Response};

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named cache (generation)
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by request hash
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_hash ON cache_entries(request_hash);
"#;

/// SQLite-based storage for named caches.
pub struct CacheStorage {
  conn: Mutex<Connection>,
}

impl CacheStorage {
  /// Open (or create) cache storage at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Create the named cache if it does not exist yet.
  pub fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_cache(&conn, name)
  }

  /// Names of all caches, oldest first.
  pub fn names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  pub fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;

    Ok(found.is_some())
  }

  /// Delete a cache and its entries. Returns whether it existed.
  pub fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;

    let deleted = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  /// Store one response, creating the cache if needed.
  pub fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    self.put_all(name, std::slice::from_ref(&(request.clone(), response.clone())))
  }

  /// Store several responses in one transaction: all are written or none.
  pub fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, name)?;
    for (request, response) in entries {
      insert_entry(&tx, name, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// Look up a response in one named cache.
  pub fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
        params![name, request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", name, e))?;

    row.map(into_response).transpose()
  }

  /// Look up a response in any cache, oldest cache first.
  pub fn match_any(&self, request: &Request) -> Result<Option<Response>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT ce.status, ce.headers, ce.body FROM cache_entries ce
         INNER JOIN caches c ON c.name = ce.cache_name
         WHERE ce.request_hash = ?
         ORDER BY c.rowid
         LIMIT 1",
        params![request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query caches: {}", e))?;

    row.map(into_response).transpose()
  }

  /// Number of entries in a cache.
  pub fn len(&self, name: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache {}: {}", name, e))?;

    Ok(count as usize)
  }
}

fn ensure_cache(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(
  tx: &Transaction<'_>,
  name: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  tx.execute(
    "INSERT OR REPLACE INTO cache_entries
       (cache_name, request_hash, method, url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      name,
      request.cache_key(),
      request.method.as_str(),
      request.url,
      response.status,
      headers,
      response.body,
    ],
  )
  .map_err(|e| eyre!("Failed to store {} in cache {}: {}", request.url, name, e))?;

  Ok(())
}

fn into_response((status, headers, body): (u16, String, Vec<u8>)) -> Result<Response> {
  let headers =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;
  Ok(Response {
    status,
    headers,
    body,
  })
}
