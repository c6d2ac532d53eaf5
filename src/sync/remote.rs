//! Remote sync endpoint client.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::db::SyncAction;

/// Path of the sync endpoint relative to the remote base URL.
pub const SYNC_PATH: &str = "/api/sync";

/// Header carrying the replayed action alongside the payload.
pub const ACTION_HEADER: &str = "X-Qmaker-Action";

/// Destination for replayed pending operations.
#[async_trait]
pub trait SyncRemote: Send + Sync {
  /// Push one already-sanitized payload. `Ok` means the remote accepted it.
  async fn push(&self, action: SyncAction, payload: &Value) -> Result<()>;

  /// Whether the remote answers at all. Any HTTP status counts as reachable.
  async fn reachable(&self) -> bool;
}

/// HTTP client for `POST /api/sync`.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpRemote {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let endpoint = Url::parse(base_url)
      .and_then(|base| base.join(SYNC_PATH))
      .map_err(|e| eyre!("Invalid remote URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, endpoint })
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }
}

#[async_trait]
impl SyncRemote for HttpRemote {
  async fn push(&self, action: SyncAction, payload: &Value) -> Result<()> {
    let response = self
      .client
      .post(self.endpoint.clone())
      .header(ACTION_HEADER, action.as_str())
      .json(payload)
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", self.endpoint, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Sync endpoint rejected {} with status {}", action.as_str(), status));
    }

    debug!(action = action.as_str(), %status, "Pushed pending operation");
    Ok(())
  }

  async fn reachable(&self) -> bool {
    match self.client.head(self.endpoint.clone()).send().await {
      Ok(_) => true,
      Err(e) => {
        debug!(endpoint = %self.endpoint, error = %e, "Remote unreachable");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::{DbLocation, OfflineStore, PaperRecord};
  use crate::sync::{Connectivity, ConnectivityHandle, SyncCoordinator};
  use crate::testing::{closed_url, TestServer};
  use serde_json::{json, Map};
  use std::sync::Arc;

  #[test]
  fn test_endpoint_joins_base() {
    let remote = HttpRemote::new("https://qmaker.example/app/", Duration::from_secs(5)).unwrap();
    assert_eq!(remote.endpoint().as_str(), "https://qmaker.example/api/sync");
  }

  #[test]
  fn test_invalid_base_rejected() {
    assert!(HttpRemote::new("not a url", Duration::from_secs(5)).is_err());
  }

  #[tokio::test]
  async fn test_push_posts_payload_with_action_header() {
    let server = TestServer::start(204, "").await;
    let remote = HttpRemote::new(server.url(), Duration::from_secs(5)).unwrap();
    let payload = json!({ "id": "p1", "title": "&lt;b&gt;Quiz&lt;/b&gt;" });

    remote.push(SyncAction::Save, &payload).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, SYNC_PATH);
    assert_eq!(requests[0].header(ACTION_HEADER), Some("save"));
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    assert_eq!(requests[0].json(), payload);
  }

  #[tokio::test]
  async fn test_push_accepts_any_2xx() {
    let server = TestServer::start(201, "created").await;
    let remote = HttpRemote::new(server.url(), Duration::from_secs(5)).unwrap();
    assert!(remote.push(SyncAction::Delete, &json!({ "id": "p1" })).await.is_ok());
  }

  #[tokio::test]
  async fn test_push_fails_on_error_status() {
    let server = TestServer::start(500, "boom").await;
    let remote = HttpRemote::new(server.url(), Duration::from_secs(5)).unwrap();

    let err = remote
      .push(SyncAction::Save, &json!({ "id": "p1" }))
      .await
      .unwrap_err();
    assert!(err.to_string().contains("500"));
  }

  #[tokio::test]
  async fn test_push_fails_when_unreachable() {
    let remote = HttpRemote::new(&closed_url().await, Duration::from_secs(5)).unwrap();
    assert!(remote.push(SyncAction::Save, &json!({})).await.is_err());
    assert!(!remote.reachable().await);
  }

  #[tokio::test]
  async fn test_reachable_on_any_status() {
    let server = TestServer::start(405, "").await;
    let remote = HttpRemote::new(server.url(), Duration::from_secs(5)).unwrap();

    assert!(remote.reachable().await);
    assert_eq!(server.requests()[0].method, "HEAD");
  }

  #[tokio::test]
  async fn test_drain_sends_sanitized_records() {
    let server = TestServer::start(200, "ok").await;
    let remote = HttpRemote::new(server.url(), Duration::from_secs(5)).unwrap();
    let connectivity = ConnectivityHandle::new(Connectivity::Offline);
    let store = Arc::new(OfflineStore::new(DbLocation::Memory, connectivity.clone()));
    let coordinator = SyncCoordinator::new(Arc::clone(&store), remote, connectivity.clone());

    let mut fields = Map::new();
    fields.insert("title".into(), json!("<script>alert('x')</script>"));
    store
      .save_record(PaperRecord::new(fields).with_id("p1"))
      .await
      .unwrap();
    store.delete_record("old").await.unwrap();

    connectivity.set(Connectivity::Online);
    let report = coordinator.drain_queue().await.unwrap();
    assert_eq!(report.pushed, 2);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header(ACTION_HEADER), Some("save"));
    assert_eq!(
      requests[0].json()["title"],
      json!("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;")
    );
    assert_eq!(requests[1].header(ACTION_HEADER), Some("delete"));
    assert_eq!(requests[1].json(), json!({ "id": "old" }));
  }
}
