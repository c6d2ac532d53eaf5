//! Request and response values handled by the asset cache worker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

/// Whether a request loads a top-level document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Page navigation; falls back to the cached shell when offline
  Navigate,
  #[default]
  Subresource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  /// Path relative to the application origin, or an absolute URL
  pub url: String,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      mode: RequestMode::Subresource,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
    Self {
      method: Method::Post,
      url: url.into(),
      mode: RequestMode::Subresource,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(body.to_string().into_bytes()),
    }
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Stable storage key for this request (method + URL).
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Exactly 200; the only status copied into the dynamic cache.
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
