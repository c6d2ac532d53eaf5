//! Application context wiring the persistence components together.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{AssetCacheWorker, CacheStorage, HttpNetwork, Network, WorkerSettings};
use crate::config::Config;
use crate::db::{DbLocation, OfflineStore, PaperRecord, DB_FILE};
use crate::kv::{EncodedStore, KvBackend, SqliteBackend};
use crate::paper::{autosave, Paper};
use crate::sync::{
  Connectivity, ConnectivityHandle, HttpRemote, SyncCoordinator, SyncRemote, Transition, SYNC_PATH,
};

const KV_FILE: &str = "storage.db";
const CACHE_FILE: &str = "cache.db";

/// Everything that needs persistence, built once at startup.
pub struct AppContext<B: KvBackend, R: SyncRemote, N: Network> {
  pub config: Config,
  pub kv: EncodedStore<B>,
  pub store: Arc<OfflineStore>,
  pub connectivity: ConnectivityHandle,
  pub coordinator: SyncCoordinator<R>,
  pub worker: AssetCacheWorker<N>,
}

pub type DefaultContext = AppContext<SqliteBackend, HttpRemote, HttpNetwork>;

impl DefaultContext {
  /// Open every store under the configured data directory.
  pub fn open(config: Config, initial: Connectivity) -> Result<Self> {
    let data_dir = config.data_dir()?;

    let kv = SqliteBackend::open(&data_dir.join(KV_FILE))?.with_quota(config.storage.quota_bytes);
    let remote = HttpRemote::new(&config.remote.base_url, config.remote.timeout())?;
    let network = HttpNetwork::new(config.cache_origin(), config.remote.timeout())?;
    let cache = CacheStorage::open(&data_dir.join(CACHE_FILE))?;

    info!(data_dir = %data_dir.display(), online = initial.is_online(), "Opening stores");
    Ok(Self::from_parts(
      config,
      kv,
      DbLocation::File(data_dir.join(DB_FILE)),
      ConnectivityHandle::new(initial),
      remote,
      cache,
      network,
    ))
  }
}

impl<B: KvBackend, R: SyncRemote, N: Network> AppContext<B, R, N> {
  pub fn from_parts(
    config: Config,
    kv_backend: B,
    location: DbLocation,
    connectivity: ConnectivityHandle,
    remote: R,
    cache: CacheStorage,
    network: N,
  ) -> Self {
    let kv = EncodedStore::new(kv_backend).with_prefix(config.storage.key_prefix.clone());
    let store = Arc::new(OfflineStore::new(location, connectivity.clone()));
    let coordinator = SyncCoordinator::new(Arc::clone(&store), remote, connectivity.clone());

    let settings = WorkerSettings {
      version: config.cache.version,
      assets: config.cache.assets.clone(),
      shell: config.cache.shell.clone(),
      sync_tag: config.cache.sync_tag.clone(),
      sync_endpoint: SYNC_PATH.to_string(),
    };
    let worker = AssetCacheWorker::new(cache, network, Arc::clone(&store), settings);

    Self {
      config,
      kv,
      store,
      connectivity,
      coordinator,
      worker,
    }
  }

  /// Save a paper as a record and autosave it as the current draft.
  pub async fn save_paper(&self, paper: &Paper, id: Option<String>) -> Result<PaperRecord> {
    autosave::save_draft(&self.kv, paper);
    self.store.save_record(paper.to_record(id)?).await
  }

  pub async fn load_paper(&self, id: &str) -> Result<Option<Paper>> {
    self
      .store
      .get_record(id)
      .await?
      .map(|record| Paper::from_record(&record))
      .transpose()
  }

  /// Follow the remote's reachability until `shutdown` flips to true.
  ///
  /// Every `period` the remote is checked and the result fed into the
  /// connectivity state; the coordinator drains the queue on each
  /// reconnect, and queued offline actions are replayed after it.
  pub async fn watch(&self, period: Duration, shutdown: watch::Receiver<bool>) {
    tokio::join!(
      self.coordinator.run(shutdown.clone()),
      self.poll_reachability(period, shutdown),
    );
  }

  async fn poll_reachability(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          let next = Connectivity::from_online(self.coordinator.remote().reachable().await);
          if self.connectivity.set(next) == Some(Transition::WentOnline) {
            self.replay_offline_actions().await;
          }
        }
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
      }
    }
    debug!("Reachability polling stopped");
  }

  async fn replay_offline_actions(&self) {
    match self.worker.handle_sync(&self.config.cache.sync_tag).await {
      Ok(Some(report)) if report.pushed + report.remaining > 0 => {
        info!(pushed = report.pushed, remaining = report.remaining, "Replayed offline actions");
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "Failed to replay offline actions"),
    }
  }
}
