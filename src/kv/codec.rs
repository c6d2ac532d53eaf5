//! Text-safe encoding for stored values.
//!
//! Values are serialized to JSON, then the UTF-8 bytes of that JSON are
//! base64 encoded so the stored text is plain ASCII regardless of script.
//! Values written before the encoding existed are plain JSON; [`decode`]
//! reports which of the two formats matched.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;

/// Outcome of decoding a raw stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
  /// Payload was in the current base64 encoding
  Current(T),
  /// Payload was plain JSON written before the encoding was introduced
  Legacy(T),
  /// Neither format could be parsed
  Failed,
}

impl<T> Decoded<T> {
  /// Collapse into the decoded value, or `default` when decoding failed.
  pub fn unwrap_or(self, default: T) -> T {
    match self {
      Decoded::Current(v) | Decoded::Legacy(v) => v,
      Decoded::Failed => default,
    }
  }
}

/// Encode arbitrary text into the stored representation.
pub fn encode(text: &str) -> String {
  STANDARD.encode(text.as_bytes())
}

/// Reverse [`encode`].
pub fn decode_text(raw: &str) -> Result<String> {
  let bytes = STANDARD
    .decode(raw.trim())
    .map_err(|e| eyre!("Failed to decode base64 payload: {}", e))?;
  String::from_utf8(bytes).map_err(|e| eyre!("Decoded payload is not valid UTF-8: {}", e))
}

/// Decode a raw stored value, trying the current format before legacy JSON.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Decoded<T> {
  if let Ok(text) = decode_text(raw) {
    if let Ok(value) = serde_json::from_str(&text) {
      return Decoded::Current(value);
    }
  }

  match serde_json::from_str(raw) {
    Ok(value) => Decoded::Legacy(value),
    Err(_) => Decoded::Failed,
  }
}
