//! Best-effort encoded value store layered over a [`KvBackend`].

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

use super::backend::KvBackend;
use super::codec::{self, Decoded};

/// Prefix carried by every first-party key.
pub const KEY_PREFIX: &str = "qmaker-";

/// Encoded value store.
///
/// Writes serialize and encode values before handing them to the backend;
/// reads accept both the current encoding and legacy plain JSON. The
/// `set`/`get` pair never fails: persistence here is best-effort and a
/// failure must not take in-memory editor state down with it.
pub struct EncodedStore<B: KvBackend> {
  backend: B,
  prefix: String,
}

impl<B: KvBackend> EncodedStore<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      prefix: KEY_PREFIX.to_string(),
    }
  }

  /// Use a different namespace prefix for housekeeping.
  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  /// Serialize, encode and write `value` under `key`.
  pub fn try_set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let json =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.backend.set_item(key, &codec::encode(&json))
  }

  /// Like [`try_set`](Self::try_set), but failures are logged and dropped.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
    if let Err(e) = self.try_set(key, value) {
      error!(key, error = %e, "Failed to persist value");
    }
  }

  /// Read and decode the value under `key`, reporting which format matched.
  ///
  /// Returns `Ok(None)` when the key is absent.
  pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Decoded<T>>> {
    let raw = self.backend.get_item(key)?;
    Ok(raw.map(|raw| codec::decode(&raw)))
  }

  /// Read the value under `key`, or `default` if it is absent or unreadable.
  pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
    match self.try_get(key) {
      Ok(Some(Decoded::Current(value))) => value,
      Ok(Some(Decoded::Legacy(value))) => {
        debug!(key, "Read legacy plain-JSON value");
        value
      }
      Ok(Some(Decoded::Failed)) => {
        warn!(key, "Stored value could not be decoded, using default");
        default
      }
      Ok(None) => default,
      Err(e) => {
        warn!(key, error = %e, "Failed to read stored value, using default");
        default
      }
    }
  }

  /// Read `key`, falling back to an un-prefixed `legacy_key` when absent.
  pub fn get_or_legacy<T: DeserializeOwned>(&self, key: &str, legacy_key: &str, default: T) -> T {
    match self.backend.get_item(key) {
      Ok(Some(_)) => self.get(key, default),
      Ok(None) => self.get(legacy_key, default),
      Err(e) => {
        warn!(key, error = %e, "Failed to read stored value, using default");
        default
      }
    }
  }

  /// Delete `key`. Idempotent.
  pub fn remove(&self, key: &str) {
    if let Err(e) = self.backend.remove_item(key) {
      error!(key, error = %e, "Failed to remove value");
    }
  }

  /// Every key in this store's namespace.
  pub fn namespaced_keys(&self) -> Result<Vec<String>> {
    Ok(
      self
        .backend
        .keys()?
        .into_iter()
        .filter(|k| k.starts_with(&self.prefix))
        .collect(),
    )
  }

  /// Remove every namespaced key that `keep` rejects.
  ///
  /// Keys outside the namespace are never touched. Returns how many keys
  /// were removed.
  pub fn sweep<F>(&self, keep: F) -> Result<usize>
  where
    F: Fn(&str) -> bool,
  {
    let mut removed = 0;
    for key in self.namespaced_keys()? {
      if !keep(&key) {
        self.backend.remove_item(&key)?;
        removed += 1;
      }
    }

    debug!(removed, "Swept namespaced keys");
    Ok(removed)
  }

  /// Raw access to the backend, for writes that bypass encoding.
  #[cfg(test)]
  pub fn backend(&self) -> &B {
    &self.backend
  }
}
