use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use super::traits::Network;
use super::types::{Method, Request, Response};

/// [`Network`] backed by reqwest, resolving relative paths against an origin.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: &str, timeout: Duration) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid request URL {}: {}", url, e))
  }
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = self.resolve(&request.url)?;

    let mut builder = self.client.request(to_reqwest(request.method), url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{AssetCacheWorker, BackgroundSyncReport, CacheStorage, WorkerSettings};
  use crate::db::{DbLocation, OfflineStore};
  use crate::sync::{Connectivity, ConnectivityHandle, SYNC_PATH};
  use crate::testing::{closed_url, TestServer};
  use serde_json::json;
  use std::sync::Arc;

  fn network(origin: &str) -> HttpNetwork {
    HttpNetwork::new(origin, Duration::from_secs(5)).unwrap()
  }

  fn sync_worker(origin: &str) -> (AssetCacheWorker<HttpNetwork>, Arc<OfflineStore>) {
    let store = Arc::new(OfflineStore::new(
      DbLocation::Memory,
      ConnectivityHandle::new(Connectivity::Online),
    ));
    let settings = WorkerSettings {
      version: 1,
      assets: Vec::new(),
      shell: "/index.html".to_string(),
      sync_tag: "sync-offline-actions".to_string(),
      sync_endpoint: SYNC_PATH.to_string(),
    };
    let worker = AssetCacheWorker::new(
      CacheStorage::open_in_memory().unwrap(),
      network(origin),
      Arc::clone(&store),
      settings,
    );
    (worker, store)
  }

  #[tokio::test]
  async fn test_get_returns_status_headers_and_body() {
    let server =
      TestServer::start_with_headers(200, "body { margin: 0 }", &[("Content-Type", "text/css")])
        .await;

    let response = network(server.url())
      .fetch(&Request::get("/static/css/main.css"))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"body { margin: 0 }");
    assert_eq!(response.header("content-type"), Some("text/css"));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/static/css/main.css");
  }

  #[tokio::test]
  async fn test_post_sends_body_and_headers() {
    let server = TestServer::start(204, "").await;

    let response = network(server.url())
      .fetch(&Request::post_json("/api/sync", &json!({ "id": "p1" })))
      .await
      .unwrap();

    assert_eq!(response.status, 204);
    assert!(response.body.is_empty());

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    assert_eq!(requests[0].json(), json!({ "id": "p1" }));
  }

  #[tokio::test]
  async fn test_error_status_is_a_response() {
    let server = TestServer::start(404, "not found").await;

    let response = network(server.url())
      .fetch(&Request::get("/missing.png"))
      .await
      .unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(response.body, b"not found");
  }

  #[tokio::test]
  async fn test_unreachable_origin_fails() {
    let url = closed_url().await;
    assert!(network(&url).fetch(&Request::get("/index.html")).await.is_err());
  }

  #[tokio::test]
  async fn test_background_sync_posts_sanitized_actions() {
    let server = TestServer::start(204, "").await;
    let (worker, store) = sync_worker(server.url());
    store
      .queue_offline_action(&json!({ "title": "<b>Quiz</b> & \"more\"", "marks": 5 }))
      .await
      .unwrap();

    let report = worker.handle_sync("sync-offline-actions").await.unwrap();

    assert_eq!(report, Some(BackgroundSyncReport { pushed: 1, remaining: 0 }));
    assert!(store.offline_actions().await.unwrap().is_empty());
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, SYNC_PATH);
    assert_eq!(
      requests[0].json(),
      json!({ "title": "&lt;b&gt;Quiz&lt;/b&gt; &amp; &quot;more&quot;", "marks": 5 })
    );
  }

  #[tokio::test]
  async fn test_background_sync_keeps_rejected_actions() {
    let server = TestServer::start(500, "boom").await;
    let (worker, store) = sync_worker(server.url());
    store.queue_offline_action(&json!({ "title": "Final" })).await.unwrap();

    let report = worker.handle_sync("sync-offline-actions").await.unwrap();

    assert_eq!(report, Some(BackgroundSyncReport { pushed: 0, remaining: 1 }));
    assert_eq!(store.offline_actions().await.unwrap().len(), 1);
    assert_eq!(server.requests().len(), 1);
  }

  #[test]
  fn test_resolve_relative_paths() {
    let network = HttpNetwork::new("https://qmaker.example", Duration::from_secs(5)).unwrap();
    assert_eq!(
      network.resolve("/static/css/main.css").unwrap().as_str(),
      "https://qmaker.example/static/css/main.css"
    );
    assert_eq!(
      network.resolve("https://cdn.example/lib.js").unwrap().as_str(),
      "https://cdn.example/lib.js"
    );
  }
}
