//! Asset cache worker for offline delivery of the application shell.
//!
//! This module provides:
//! - Named cache generations (`static-vN`, `dynamic-vN`) persisted in SQLite
//! - All-or-nothing pre-caching of the shell manifest on install
//! - Cache-first serving with network fallback and an offline shell
//! - Purging of superseded generations on activation

mod network;
mod storage;
mod traits;
mod types;
mod worker;

pub use network::HttpNetwork;
pub use storage::CacheStorage;
pub use traits::{FetchSource, Fetched, Network};
pub use types::{Method, Request, RequestMode, Response};
pub use worker::{
  ActivationReport, AssetCacheWorker, BackgroundSyncReport, CacheNames, WorkerSettings,
  WorkerState,
};

#[cfg(test)]
pub(crate) use worker::tests::FakeNetwork;
