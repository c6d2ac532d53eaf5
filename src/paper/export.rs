//! JSON export and import of papers.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Paper;

const FORMAT: &str = "qmaker-paper";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument {
  format: String,
  version: u32,
  exported_at: DateTime<Utc>,
  paper: Paper,
}

/// Render a paper as a pretty-printed export document.
pub fn export_json(paper: &Paper) -> Result<String> {
  let doc = ExportDocument {
    format: FORMAT.to_string(),
    version: FORMAT_VERSION,
    exported_at: Utc::now(),
    paper: paper.clone(),
  };
  serde_json::to_string_pretty(&doc).map_err(|e| eyre!("Failed to export paper: {}", e))
}

/// Parse an export document, or a bare paper object.
pub fn import_json(text: &str) -> Result<Paper> {
  let value: Value =
    serde_json::from_str(text).map_err(|e| eyre!("Failed to parse paper JSON: {}", e))?;

  if value.get("format").and_then(Value::as_str) == Some(FORMAT) {
    let doc: ExportDocument =
      serde_json::from_value(value).map_err(|e| eyre!("Invalid export document: {}", e))?;
    if doc.version > FORMAT_VERSION {
      return Err(eyre!(
        "Export version {} is newer than supported version {}",
        doc.version,
        FORMAT_VERSION
      ));
    }
    return Ok(doc.paper);
  }

  serde_json::from_value(value).map_err(|e| eyre!("Invalid paper: {}", e))
}
