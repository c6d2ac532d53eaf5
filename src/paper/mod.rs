//! The paper model, draft autosave and JSON export.

pub mod autosave;
pub mod export;
mod types;

pub use types::{Paper, PaperMetadata, Section, SubQuestion};

#[cfg(test)]
pub(crate) use types::tests::sample_paper;
