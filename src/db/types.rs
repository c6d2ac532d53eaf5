use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored paper: its fields plus bookkeeping stamped on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperRecord {
  /// Assigned on first save when absent
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  /// Paper content (metadata, sections, ...)
  #[serde(flatten)]
  pub fields: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<DateTime<Utc>>,
  /// Whether the remote had this version when it was saved
  #[serde(default)]
  pub synced: bool,
}

impl PaperRecord {
  pub fn new(fields: Map<String, Value>) -> Self {
    Self {
      id: None,
      fields,
      last_modified: None,
      synced: false,
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }
}

/// Kind of mutation a pending operation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
  Save,
  Delete,
}

impl SyncAction {
  pub fn as_str(self) -> &'static str {
    match self {
      SyncAction::Save => "save",
      SyncAction::Delete => "delete",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "save" => Some(SyncAction::Save),
      "delete" => Some(SyncAction::Delete),
      _ => None,
    }
  }
}

/// A mutation recorded while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
  pub id: i64,
  pub action: SyncAction,
  pub data: Value,
  pub timestamp: DateTime<Utc>,
}

/// An item queued for background sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAction {
  pub id: i64,
  pub data: Value,
  pub timestamp: DateTime<Utc>,
}
