//! Draft autosave into the encoded key/value store.

use tracing::debug;

use super::types::{Paper, PaperMetadata, Section};
use crate::kv::{EncodedStore, KvBackend};

pub const METADATA_KEY: &str = "qmaker-paper-metadata";
pub const SECTIONS_KEY: &str = "qmaker-sections";

/// Keys written by builds that predate the `qmaker-` namespace.
const LEGACY_METADATA_KEY: &str = "paperMetadata";
const LEGACY_SECTIONS_KEY: &str = "sections";

/// Persist the draft being edited. Best-effort: failures are logged.
pub fn save_draft<B: KvBackend>(kv: &EncodedStore<B>, paper: &Paper) {
  kv.set(METADATA_KEY, &paper.metadata);
  kv.set(SECTIONS_KEY, &paper.sections);
  debug!(sections = paper.sections.len(), "Autosaved draft");
}

/// Restore the last draft, or an empty paper.
pub fn load_draft<B: KvBackend>(kv: &EncodedStore<B>) -> Paper {
  let metadata: PaperMetadata =
    kv.get_or_legacy(METADATA_KEY, LEGACY_METADATA_KEY, PaperMetadata::default());
  let sections: Vec<Section> = kv.get_or_legacy(SECTIONS_KEY, LEGACY_SECTIONS_KEY, Vec::new());
  Paper { metadata, sections }
}

/// Forget the draft, including any legacy copies.
pub fn clear_draft<B: KvBackend>(kv: &EncodedStore<B>) {
  for key in [
    METADATA_KEY,
    SECTIONS_KEY,
    LEGACY_METADATA_KEY,
    LEGACY_SECTIONS_KEY,
  ] {
    kv.remove(key);
  }
}
