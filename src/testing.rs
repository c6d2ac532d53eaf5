//! Local HTTP server for exercising the reqwest clients.
//!
//! Answers every request with a fixed status and body and records what it
//! received.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub(crate) struct ReceivedRequest {
  pub method: String,
  pub path: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ReceivedRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json(&self) -> serde_json::Value {
    serde_json::from_slice(&self.body).unwrap()
  }
}

pub(crate) struct TestServer {
  url: String,
  requests: Arc<Mutex<Vec<ReceivedRequest>>>,
  handle: JoinHandle<()>,
}

impl TestServer {
  /// Serve `status` with `body` on an OS-assigned port.
  pub async fn start(status: u16, body: &'static str) -> Self {
    Self::start_with_headers(status, body, &[]).await
  }

  pub async fn start_with_headers(
    status: u16,
    body: &'static str,
    headers: &'static [(&'static str, &'static str)],
  ) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&requests);
    let handle = tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
          if let Err(e) = handle_connection(stream, status, body, headers, seen).await {
            tracing::debug!("test server connection error: {}", e);
          }
        });
      }
    });

    Self {
      url,
      requests,
      handle,
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn requests(&self) -> Vec<ReceivedRequest> {
    self.requests.lock().unwrap().clone()
  }
}

impl Drop for TestServer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

/// A URL on which nothing is listening.
pub(crate) async fn closed_url() -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let url = format!("http://{}", listener.local_addr().unwrap());
  drop(listener);
  url
}

async fn handle_connection(
  mut stream: TcpStream,
  status: u16,
  body: &str,
  headers: &[(&str, &str)],
  seen: Arc<Mutex<Vec<ReceivedRequest>>>,
) -> std::io::Result<()> {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];

  // Read the head, then as much body as Content-Length announces
  let head_end = loop {
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      return Ok(());
    }
    buf.extend_from_slice(&chunk[..n]);
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
      break pos + 4;
    }
  };

  let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
  let mut lines = head.lines();
  let mut request_line = lines.next().unwrap_or_default().split_whitespace();
  let method = request_line.next().unwrap_or_default().to_string();
  let path = request_line.next().unwrap_or_default().to_string();
  let request_headers: Vec<(String, String)> = lines
    .filter_map(|line| line.split_once(':'))
    .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
    .collect();

  let content_length = request_headers
    .iter()
    .find(|(k, _)| k == "content-length")
    .and_then(|(_, v)| v.parse::<usize>().ok())
    .unwrap_or(0);

  while buf.len() < head_end + content_length {
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      break;
    }
    buf.extend_from_slice(&chunk[..n]);
  }

  seen.lock().unwrap().push(ReceivedRequest {
    method,
    path,
    headers: request_headers,
    body: buf[head_end..].to_vec(),
  });

  let mut response = format!("HTTP/1.1 {} Test\r\nConnection: close\r\n", status);
  for (name, value) in headers {
    response.push_str(&format!("{}: {}\r\n", name, value));
  }
  if status == 204 {
    response.push_str("\r\n");
  } else {
    response.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
  }

  stream.write_all(response.as_bytes()).await?;
  stream.shutdown().await
}
