//! Offline document store: paper records plus the queues replayed on reconnect.

pub mod schema;
mod store;
mod types;

pub use store::OfflineStore;
pub use types::{OfflineAction, PaperRecord, PendingOp, SyncAction};

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// File name of the document database inside the data directory.
pub const DB_FILE: &str = "qmaker.db";

/// Where a database lives.
#[derive(Debug, Clone)]
pub enum DbLocation {
  File(PathBuf),
  Memory,
}

/// Database connection wrapper
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database and bring its schema up to date
  pub fn open(location: &DbLocation) -> Result<Self> {
    let conn = match location {
      DbLocation::File(path) => Self::open_file(path)?,
      DbLocation::Memory => Connection::open_in_memory()
        .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?,
    };

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  fn open_file(path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn()?;

    let version: u32 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    if version > schema::DB_VERSION {
      return Err(eyre!(
        "Database schema version {} is newer than supported version {}",
        version,
        schema::DB_VERSION
      ));
    }

    if version < schema::DB_VERSION {
      conn
        .execute_batch(schema::SCHEMA)
        .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
      conn
        .pragma_update(None, "user_version", schema::DB_VERSION)
        .map_err(|e| eyre!("Failed to record schema version: {}", e))?;
      info!(from = version, to = schema::DB_VERSION, "Upgraded document database");
    }

    Ok(())
  }

  /// Lock the connection
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_open_sets_schema_version() {
    let db = Database::open(&DbLocation::Memory).unwrap();
    let version: u32 = db
      .conn()
      .unwrap()
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .unwrap();
    assert_eq!(version, schema::DB_VERSION);
  }

  #[test]
  fn test_reopen_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let location = DbLocation::File(dir.path().join(DB_FILE));

    Database::open(&location).unwrap();
    Database::open(&location).unwrap();
  }

  #[test]
  fn test_newer_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DB_FILE);
    {
      let conn = Connection::open(&path).unwrap();
      conn
        .pragma_update(None, "user_version", schema::DB_VERSION + 1)
        .unwrap();
    }

    assert!(Database::open(&DbLocation::File(path)).is_err());
  }
}
