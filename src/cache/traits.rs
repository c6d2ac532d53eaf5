//! Core traits and types for the asset cache.

use async_trait::async_trait;
use color_eyre::Result;

use super::types::{Request, Response};

/// Source of network responses.
///
/// `Err` means the request never produced a response (unreachable host,
/// timeout); HTTP error statuses are returned as `Ok` responses.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Served from a cache generation
  Cache,
  /// Fresh from the network
  Network,
  /// Network unavailable, serving the cached application shell
  OfflineShell,
}

/// A response together with where it came from.
#[derive(Debug, Clone)]
pub struct Fetched {
  pub response: Response,
  pub source: FetchSource,
}

impl Fetched {
  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: FetchSource::Cache,
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: FetchSource::Network,
    }
  }

  pub fn offline_shell(response: Response) -> Self {
    Self {
      response,
      source: FetchSource::OfflineShell,
    }
  }
}
