//! Asset cache worker: shell pre-caching, cache-first fetch, generation cleanup.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::storage::CacheStorage;
use super::traits::{Fetched, Network};
use super::types::{Method, Request, Response};
use crate::db::OfflineStore;
use crate::sync::sanitize::sanitize_value;

/// Names of the current static and dynamic cache generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  pub static_name: String,
  pub dynamic_name: String,
}

impl CacheNames {
  pub fn for_version(version: u32) -> Self {
    Self {
      static_name: format!("static-v{}", version),
      dynamic_name: format!("dynamic-v{}", version),
    }
  }

  fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub version: u32,
  /// Shell assets pre-cached on install
  pub assets: Vec<String>,
  /// Document served for navigations while offline
  pub shell: String,
  /// Background sync tag that drains the offline-actions queue
  pub sync_tag: String,
  /// Where offline actions are POSTed
  pub sync_endpoint: String,
}

/// Lifecycle of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Not installed, or the last install failed
  Parsed,
  Installing,
  Installed,
  Active { version: u32 },
}

/// Caches deleted by an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub deleted: Vec<String>,
}

/// Outcome of a background sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundSyncReport {
  pub pushed: usize,
  pub remaining: usize,
}

/// Serves application requests from named cache generations with network
/// fallback.
pub struct AssetCacheWorker<N: Network> {
  storage: CacheStorage,
  network: N,
  store: Arc<OfflineStore>,
  settings: WorkerSettings,
  names: CacheNames,
  state: Mutex<WorkerState>,
  clients_claimed: AtomicBool,
}

impl<N: Network> AssetCacheWorker<N> {
  pub fn new(
    storage: CacheStorage,
    network: N,
    store: Arc<OfflineStore>,
    settings: WorkerSettings,
  ) -> Self {
    let names = CacheNames::for_version(settings.version);
    Self {
      storage,
      network,
      store,
      settings,
      names,
      state: Mutex::new(WorkerState::Parsed),
      clients_claimed: AtomicBool::new(false),
    }
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  pub fn storage(&self) -> &CacheStorage {
    &self.storage
  }

  #[cfg(test)]
  pub fn network(&self) -> &N {
    &self.network
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(WorkerState::Parsed)
  }

  fn set_state(&self, next: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *state = next;
    Ok(())
  }

  /// Whether open pages are controlled without waiting for a reload.
  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }

  /// Pre-cache every manifest asset into the static generation.
  ///
  /// All-or-nothing: if any asset fails to download or returns a
  /// non-success status, nothing is written and the install fails.
  pub async fn install(&self) -> Result<()> {
    self.set_state(WorkerState::Installing)?;
    info!(cache = %self.names.static_name, assets = self.settings.assets.len(), "Installing");

    let fetches = self.settings.assets.iter().map(|asset| async move {
      let request = Request::get(asset.as_str());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", asset, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Failed to pre-cache {}: status {}",
          asset,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request, response))
    });

    let entries = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "Install failed");
        self.set_state(WorkerState::Parsed)?;
        return Err(e);
      }
    };

    if let Err(e) = self.storage.put_all(&self.names.static_name, &entries) {
      self.set_state(WorkerState::Parsed)?;
      return Err(e);
    }

    self.set_state(WorkerState::Installed)?;
    info!(cache = %self.names.static_name, "Installed");
    Ok(())
  }

  /// Purge every cache generation that is not current and take control of
  /// open pages.
  ///
  /// A static generation installed by an earlier run counts as installed.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let state = self.state();
    let installed = matches!(state, WorkerState::Installed | WorkerState::Active { .. })
      || self.storage.has(&self.names.static_name)?;
    if !installed {
      return Err(eyre!("Cannot activate worker in state {:?}", state));
    }

    let mut deleted = Vec::new();
    for name in self.storage.names()? {
      if !self.names.is_current(&name) {
        self.storage.delete(&name)?;
        info!(cache = %name, "Deleted stale cache");
        deleted.push(name);
      }
    }

    self.storage.open_cache(&self.names.static_name)?;
    self.storage.open_cache(&self.names.dynamic_name)?;

    self.set_state(WorkerState::Active {
      version: self.settings.version,
    })?;
    self.clients_claimed.store(true, Ordering::SeqCst);

    Ok(ActivationReport { deleted })
  }

  /// Serve a request: cache first, then network, then the offline shell.
  ///
  /// Only GET requests touch the caches; everything else goes straight to
  /// the network.
  pub async fn fetch(&self, request: &Request) -> Result<Fetched> {
    if request.method != Method::Get {
      return Ok(Fetched::from_network(self.network.fetch(request).await?));
    }

    if let Some(cached) = self.storage.match_any(request)? {
      debug!(url = %request.url, "Cache hit");
      return Ok(Fetched::from_cache(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          if let Err(e) = self
            .storage
            .put(&self.names.dynamic_name, request, &response)
          {
            warn!(url = %request.url, error = %e, "Failed to update dynamic cache");
          }
        }
        Ok(Fetched::from_network(response))
      }
      Err(e) => {
        if request.is_navigation() {
          if let Some(shell) = self.cached_shell()? {
            debug!(url = %request.url, "Network unavailable, serving shell");
            return Ok(Fetched::offline_shell(shell));
          }
        }
        Err(e)
      }
    }
  }

  /// Whether the offline shell is in the current static generation.
  pub fn shell_cached(&self) -> Result<bool> {
    let shell = Request::get(self.settings.shell.as_str());
    Ok(self.storage.match_in(&self.names.static_name, &shell)?.is_some())
  }

  fn cached_shell(&self) -> Result<Option<Response>> {
    self
      .storage
      .match_any(&Request::get(self.settings.shell.as_str()))
  }

  /// Handle a background sync event.
  ///
  /// Returns `None` for tags this worker does not own. Each offline action
  /// is POSTed on its own; failed items stay queued for the next trigger.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<BackgroundSyncReport>> {
    if tag != self.settings.sync_tag {
      debug!(tag, "Ignoring unknown sync tag");
      return Ok(None);
    }

    let actions = self.store.offline_actions().await?;
    let mut pushed = 0;
    let mut remaining = 0;

    for action in actions {
      let request = Request::post_json(
        self.settings.sync_endpoint.as_str(),
        &sanitize_value(&action.data),
      );

      match self.network.fetch(&request).await {
        Ok(response) if response.is_success() => {
          self.store.remove_offline_action(action.id).await?;
          pushed += 1;
        }
        Ok(response) => {
          warn!(id = action.id, status = response.status, "Offline action rejected");
          remaining += 1;
        }
        Err(e) => {
          warn!(id = action.id, error = %e, "Failed to sync offline action");
          remaining += 1;
        }
      }
    }

    info!(pushed, remaining, "Background sync finished");
    Ok(Some(BackgroundSyncReport { pushed, remaining }))
  }
}
