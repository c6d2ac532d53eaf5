//! Async document store over the SQLite database.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Transaction};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::types::{OfflineAction, PaperRecord, PendingOp, SyncAction};
use super::{Database, DbLocation};
use crate::sync::ConnectivityHandle;

/// Document store for paper records and the offline queues.
///
/// The database is opened lazily on first use. Every operation runs in its
/// own transaction; mutations made while offline are queued in the same
/// transaction as the write itself.
pub struct OfflineStore {
  location: DbLocation,
  db: OnceCell<Arc<Database>>,
  connectivity: ConnectivityHandle,
}

impl OfflineStore {
  pub fn new(location: DbLocation, connectivity: ConnectivityHandle) -> Self {
    Self {
      location,
      db: OnceCell::new(),
      connectivity,
    }
  }

  /// Open the database. Concurrent callers share a single open.
  pub async fn open(&self) -> Result<Arc<Database>> {
    let db = self
      .db
      .get_or_try_init(|| async {
        let db = Database::open(&self.location)?;
        info!(location = ?self.location, "Opened document database");
        Ok::<_, color_eyre::Report>(Arc::new(db))
      })
      .await?;

    Ok(Arc::clone(db))
  }

  /// Save a record, assigning an id if it has none.
  ///
  /// Returns the record as stored. When offline, a `save` operation carrying
  /// a copy of the record is queued for the next sync.
  pub async fn save_record(&self, mut record: PaperRecord) -> Result<PaperRecord> {
    let online = self.connectivity.is_online();
    let id = record.id.get_or_insert_with(generate_id).clone();
    let now = Utc::now();
    record.last_modified = Some(now);
    record.synced = online;

    let data =
      serde_json::to_string(&record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    let db = self.open().await?;
    let mut conn = db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT INTO records (id, data, last_modified, synced) VALUES (?, ?, ?, ?)
       ON CONFLICT(id) DO UPDATE SET
         data = excluded.data,
         last_modified = excluded.last_modified,
         synced = excluded.synced",
      params![id, data, format_timestamp(now), online],
    )
    .map_err(|e| eyre!("Failed to store record {}: {}", id, e))?;

    if !online {
      let copy =
        serde_json::to_value(&record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
      enqueue(&tx, SyncAction::Save, &copy)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(id = %id, online, "Saved record");
    Ok(record)
  }

  pub async fn get_record(&self, id: &str) -> Result<Option<PaperRecord>> {
    let db = self.open().await?;
    let conn = db.conn()?;

    let data: Option<String> = conn
      .query_row("SELECT data FROM records WHERE id = ?", params![id], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read record {}: {}", id, e))?;

    data.map(|d| parse_record(&d)).transpose()
  }

  /// All records in insertion order.
  pub async fn list_records(&self) -> Result<Vec<PaperRecord>> {
    // A negative LIMIT means no limit in SQLite
    self
      .query_records("SELECT data FROM records ORDER BY rowid LIMIT ?", -1)
      .await
  }

  /// The `limit` most recently modified records, newest first.
  pub async fn recent_records(&self, limit: usize) -> Result<Vec<PaperRecord>> {
    self
      .query_records(
        "SELECT data FROM records ORDER BY last_modified DESC LIMIT ?",
        limit as i64,
      )
      .await
  }

  async fn query_records(&self, sql: &str, limit: i64) -> Result<Vec<PaperRecord>> {
    let db = self.open().await?;
    let conn = db.conn()?;

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![limit], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read record row: {}", e))?;

    rows.iter().map(|d| parse_record(d)).collect()
  }

  /// Delete a record. Returns whether it existed.
  ///
  /// When offline, a `delete` operation is queued regardless, since the
  /// remote may hold a copy the local store never had.
  pub async fn delete_record(&self, id: &str) -> Result<bool> {
    let online = self.connectivity.is_online();

    let db = self.open().await?;
    let mut conn = db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let deleted = tx
      .execute("DELETE FROM records WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete record {}: {}", id, e))?;

    if !online {
      enqueue(&tx, SyncAction::Delete, &json!({ "id": id }))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(id, online, existed = deleted > 0, "Deleted record");
    Ok(deleted > 0)
  }

  /// Flag a record as synced, provided it was not modified after the copy
  /// that was pushed. Returns whether the flag changed.
  pub async fn mark_synced(&self, id: &str, pushed_version: DateTime<Utc>) -> Result<bool> {
    let db = self.open().await?;
    let mut conn = db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let data: Option<String> = tx
      .query_row(
        "SELECT data FROM records WHERE id = ? AND last_modified = ?",
        params![id, format_timestamp(pushed_version)],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {}: {}", id, e))?;

    let Some(data) = data else {
      return Ok(false);
    };

    let mut record = parse_record(&data)?;
    record.synced = true;
    let data =
      serde_json::to_string(&record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    tx.execute(
      "UPDATE records SET data = ?, synced = 1 WHERE id = ?",
      params![data, id],
    )
    .map_err(|e| eyre!("Failed to update record {}: {}", id, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(true)
  }

  /// Pending operations in queue order.
  pub async fn pending_ops(&self) -> Result<Vec<PendingOp>> {
    let db = self.open().await?;
    let conn = db.conn()?;

    let mut stmt = conn
      .prepare("SELECT id, action, data, timestamp FROM pending_ops ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending operations: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending operation: {}", e))?;

    rows
      .into_iter()
      .map(|(id, action, data, timestamp)| -> Result<PendingOp> {
        Ok(PendingOp {
          id,
          action: SyncAction::parse(&action)
            .ok_or_else(|| eyre!("Unknown action '{}' in pending operation {}", action, id))?,
          data: parse_json(&data)?,
          timestamp: parse_timestamp(&timestamp)?,
        })
      })
      .collect()
  }

  pub async fn remove_pending_op(&self, id: i64) -> Result<()> {
    let db = self.open().await?;
    let conn = db.conn()?;

    conn
      .execute("DELETE FROM pending_ops WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove pending operation {}: {}", id, e))?;

    Ok(())
  }

  pub async fn pending_count(&self) -> Result<usize> {
    let db = self.open().await?;
    let conn = db.conn()?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_ops", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending operations: {}", e))?;

    Ok(count as usize)
  }

  /// Queue an item for background sync. Returns its id.
  pub async fn queue_offline_action(&self, data: &Value) -> Result<i64> {
    let db = self.open().await?;
    let conn = db.conn()?;

    conn
      .execute(
        "INSERT INTO offline_actions (data, timestamp) VALUES (?, ?)",
        params![data.to_string(), format_timestamp(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to queue offline action: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  pub async fn offline_actions(&self) -> Result<Vec<OfflineAction>> {
    let db = self.open().await?;
    let conn = db.conn()?;

    let mut stmt = conn
      .prepare("SELECT id, data, timestamp FROM offline_actions ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query offline actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read offline action: {}", e))?;

    rows
      .into_iter()
      .map(|(id, data, timestamp)| -> Result<OfflineAction> {
        Ok(OfflineAction {
          id,
          data: parse_json(&data)?,
          timestamp: parse_timestamp(&timestamp)?,
        })
      })
      .collect()
  }

  pub async fn remove_offline_action(&self, id: i64) -> Result<()> {
    let db = self.open().await?;
    let conn = db.conn()?;

    conn
      .execute("DELETE FROM offline_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove offline action {}: {}", id, e))?;

    Ok(())
  }
}

/// Append a pending operation inside an open transaction.
fn enqueue(tx: &Transaction<'_>, action: SyncAction, data: &Value) -> Result<()> {
  tx.execute(
    "INSERT INTO pending_ops (action, data, timestamp) VALUES (?, ?, ?)",
    params![action.as_str(), data.to_string(), format_timestamp(Utc::now())],
  )
  .map_err(|e| eyre!("Failed to queue {} operation: {}", action.as_str(), e))?;

  Ok(())
}

/// Time-based record id. Unique within a process, not across devices.
fn generate_id() -> String {
  static SEQ: AtomicU64 = AtomicU64::new(0);
  let seq = SEQ.fetch_add(1, Ordering::Relaxed);
  format!("paper-{}-{}", Utc::now().timestamp_millis(), seq)
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}

fn parse_json(s: &str) -> Result<Value> {
  serde_json::from_str(s).map_err(|e| eyre!("Failed to parse stored JSON: {}", e))
}

fn parse_record(s: &str) -> Result<PaperRecord> {
  serde_json::from_str(s).map_err(|e| eyre!("Failed to parse stored record: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::Connectivity;
  use serde_json::Map;

  fn store(state: Connectivity) -> (OfflineStore, ConnectivityHandle) {
    let connectivity = ConnectivityHandle::new(state);
    (
      OfflineStore::new(DbLocation::Memory, connectivity.clone()),
      connectivity,
    )
  }

  fn record(title: &str) -> PaperRecord {
    let mut fields = Map::new();
    fields.insert("title".into(), json!(title));
    PaperRecord::new(fields)
  }

  #[tokio::test]
  async fn test_concurrent_open_shares_database() {
    let (store, _) = store(Connectivity::Online);

    let handles = futures::future::try_join_all((0..8).map(|_| store.open()))
      .await
      .unwrap();

    for db in &handles[1..] {
      assert!(Arc::ptr_eq(&handles[0], db));
    }
  }

  #[tokio::test]
  async fn test_save_assigns_id_and_stamps() {
    let (store, _) = store(Connectivity::Online);

    let saved = store.save_record(record("Midterm")).await.unwrap();
    let id = saved.id.clone().unwrap();
    assert!(saved.synced);
    assert!(saved.last_modified.is_some());

    let loaded = store.get_record(&id).await.unwrap().unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(loaded.fields["title"], json!("Midterm"));
  }

  #[tokio::test]
  async fn test_save_online_does_not_queue() {
    let (store, _) = store(Connectivity::Online);
    store.save_record(record("A").with_id("p1")).await.unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_save_offline_queues_exactly_one_copy() {
    let (store, _) = store(Connectivity::Offline);

    let saved = store.save_record(record("A").with_id("p1")).await.unwrap();
    assert!(!saved.synced);

    let ops = store.pending_ops().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].action, SyncAction::Save);
    assert_eq!(ops[0].data, serde_json::to_value(&saved).unwrap());
  }

  #[tokio::test]
  async fn test_resave_updates_in_place() {
    let (store, _) = store(Connectivity::Online);

    store.save_record(record("first").with_id("a")).await.unwrap();
    store.save_record(record("second").with_id("b")).await.unwrap();
    store.save_record(record("first v2").with_id("a")).await.unwrap();

    let all = store.list_records().await.unwrap();
    let ids: Vec<_> = all.iter().map(|r| r.id.clone().unwrap()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(all[0].fields["title"], json!("first v2"));

    let recent = store.recent_records(1).await.unwrap();
    assert_eq!(recent[0].id.as_deref(), Some("a"));
  }

  #[tokio::test]
  async fn test_generated_ids_are_distinct() {
    let (store, _) = store(Connectivity::Online);
    let a = store.save_record(record("x")).await.unwrap();
    let b = store.save_record(record("y")).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(store.list_records().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_delete_offline_queues_delete() {
    let (store, connectivity) = store(Connectivity::Online);
    store.save_record(record("A").with_id("p1")).await.unwrap();

    connectivity.set(Connectivity::Offline);
    assert!(store.delete_record("p1").await.unwrap());
    assert!(store.get_record("p1").await.unwrap().is_none());

    let ops = store.pending_ops().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].action, SyncAction::Delete);
    assert_eq!(ops[0].data, json!({ "id": "p1" }));
  }

  #[tokio::test]
  async fn test_mark_synced_only_for_current_version() {
    let (store, connectivity) = store(Connectivity::Offline);
    store.save_record(record("v1").with_id("p1")).await.unwrap();
    let second = store.save_record(record("v2").with_id("p1")).await.unwrap();

    // Strictly older than the stored version
    let current = second.last_modified.unwrap();
    let stale = current - chrono::Duration::seconds(1);
    assert!(!store.mark_synced("p1", stale).await.unwrap());
    assert!(!store.get_record("p1").await.unwrap().unwrap().synced);

    connectivity.set(Connectivity::Online);
    assert!(store.mark_synced("p1", current).await.unwrap());
    assert!(store.get_record("p1").await.unwrap().unwrap().synced);
  }

  #[tokio::test]
  async fn test_pending_queue_order_and_removal() {
    let (store, _) = store(Connectivity::Offline);
    store.save_record(record("A").with_id("a")).await.unwrap();
    store.save_record(record("B").with_id("b")).await.unwrap();
    store.delete_record("a").await.unwrap();

    let ops = store.pending_ops().await.unwrap();
    let actions: Vec<_> = ops.iter().map(|o| o.action).collect();
    assert_eq!(
      actions,
      vec![SyncAction::Save, SyncAction::Save, SyncAction::Delete]
    );

    store.remove_pending_op(ops[1].id).await.unwrap();
    store.remove_pending_op(ops[1].id).await.unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_offline_actions_queue() {
    let (store, _) = store(Connectivity::Online);
    let first = store
      .queue_offline_action(&json!({ "kind": "autosave" }))
      .await
      .unwrap();
    store
      .queue_offline_action(&json!({ "kind": "export" }))
      .await
      .unwrap();

    store.remove_offline_action(first).await.unwrap();
    let remaining = store.offline_actions().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].data, json!({ "kind": "export" }));

    // Separate from the pending operation queue
    assert_eq!(store.pending_count().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_records_persist_across_stores() {
    let dir = tempfile::tempdir().unwrap();
    let location = DbLocation::File(dir.path().join("qmaker.db"));

    let first = OfflineStore::new(
      location.clone(),
      ConnectivityHandle::new(Connectivity::Offline),
    );
    first.save_record(record("kept").with_id("p1")).await.unwrap();
    drop(first);

    let second = OfflineStore::new(location, ConnectivityHandle::new(Connectivity::Online));
    assert!(second.get_record("p1").await.unwrap().is_some());
    assert_eq!(second.pending_count().await.unwrap(), 1);
  }
}
