//! Encoded key/value persistence for synchronous autosave.
//!
//! - Values are stored as base64-encoded JSON so any script survives storage
//! - Plain-JSON values written by older versions stay readable
//! - Writes are best-effort: failures are logged, never raised to the editor

pub mod backend;
pub mod codec;
mod store;

pub use backend::{KvBackend, MemoryBackend, SqliteBackend};
pub use store::{EncodedStore, KEY_PREFIX};
