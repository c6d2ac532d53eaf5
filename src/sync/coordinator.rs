//! Replays queued offline mutations when connectivity returns.

use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use super::connectivity::{ConnectivityHandle, Transition};
use super::remote::SyncRemote;
use super::sanitize::sanitize_value;
use crate::db::{OfflineStore, PaperRecord, SyncAction};

/// Sync progress as shown by the status indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
  /// Nothing has happened yet
  Idle,
  /// Writes are being queued locally
  Offline,
  /// A drain is in progress
  Syncing { pending: usize },
  /// The last drain pushed everything
  Synced { pushed: usize },
  /// The last drain stopped on an error
  Failed { remaining: usize, error: String },
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  pub pushed: usize,
  pub remaining: usize,
}

/// Drains the pending-operation queue to a [`SyncRemote`].
pub struct SyncCoordinator<R: SyncRemote> {
  store: Arc<OfflineStore>,
  remote: R,
  connectivity: ConnectivityHandle,
  status: watch::Sender<SyncStatus>,
  /// Serializes drains so an entry is never pushed twice concurrently
  drain_lock: Mutex<()>,
}

impl<R: SyncRemote> SyncCoordinator<R> {
  pub fn new(store: Arc<OfflineStore>, remote: R, connectivity: ConnectivityHandle) -> Self {
    let initial = if connectivity.is_online() {
      SyncStatus::Idle
    } else {
      SyncStatus::Offline
    };
    let (status, _rx) = watch::channel(initial);

    Self {
      store,
      remote,
      connectivity,
      status,
      drain_lock: Mutex::new(()),
    }
  }

  pub fn status(&self) -> SyncStatus {
    self.status.borrow().clone()
  }

  pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
    self.status.subscribe()
  }

  pub fn remote(&self) -> &R {
    &self.remote
  }

  /// Push every pending operation in queue order.
  ///
  /// An entry is removed only after the remote accepted it. The drain stops
  /// at the first failure so later operations on the same paper are never
  /// replayed ahead of earlier ones; the failed entry and everything after
  /// it stay queued.
  pub async fn drain_queue(&self) -> Result<DrainReport> {
    let _guard = self.drain_lock.lock().await;

    let ops = self.store.pending_ops().await?;
    if ops.is_empty() {
      debug!("No pending operations to sync");
      self.status.send_replace(SyncStatus::Synced { pushed: 0 });
      return Ok(DrainReport {
        pushed: 0,
        remaining: 0,
      });
    }

    info!(pending = ops.len(), "Syncing pending operations");
    self
      .status
      .send_replace(SyncStatus::Syncing { pending: ops.len() });

    let mut pushed = 0;
    for op in ops {
      let payload = sanitize_value(&op.data);

      if let Err(e) = self.remote.push(op.action, &payload).await {
        let remaining = self.store.pending_count().await?;
        warn!(op_id = op.id, action = op.action.as_str(), error = %e, remaining, "Sync failed, keeping operation queued");
        self.status.send_replace(SyncStatus::Failed {
          remaining,
          error: e.to_string(),
        });
        return Ok(DrainReport { pushed, remaining });
      }

      self.store.remove_pending_op(op.id).await?;
      pushed += 1;

      if op.action == SyncAction::Save {
        self.mark_synced(&op.data).await;
      }
    }

    info!(pushed, "Sync complete");
    self.status.send_replace(SyncStatus::Synced { pushed });
    Ok(DrainReport {
      pushed,
      remaining: 0,
    })
  }

  /// Flip the local `synced` flag for a pushed save, when it is still current.
  async fn mark_synced(&self, data: &serde_json::Value) {
    let Ok(record) = serde_json::from_value::<PaperRecord>(data.clone()) else {
      return;
    };
    let (Some(id), Some(version)) = (record.id, record.last_modified) else {
      return;
    };

    if let Err(e) = self.store.mark_synced(&id, version).await {
      warn!(id = %id, error = %e, "Failed to mark record as synced");
    }
  }

  /// React to a connectivity transition.
  pub async fn handle(&self, transition: Transition) {
    match transition {
      Transition::WentOnline => {
        info!("Connection restored");
        if let Err(e) = self.drain_queue().await {
          warn!(error = %e, "Failed to drain pending operations");
          self.status.send_replace(SyncStatus::Failed {
            remaining: self.store.pending_count().await.unwrap_or(0),
            error: e.to_string(),
          });
        }
      }
      Transition::WentOffline => {
        info!("Connection lost, queueing writes locally");
        self.status.send_replace(SyncStatus::Offline);
      }
    }
  }

  /// Follow connectivity transitions until `shutdown` flips to true.
  ///
  /// Transitions are handled one at a time in the order they happened, so a
  /// reconnect that happens while a drain is running triggers another drain.
  /// A queue left over from a previous session is drained at startup when
  /// already online.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    // Subscribe before reading the state so no transition falls in between
    let mut transitions = self.connectivity.transitions();

    if self.connectivity.is_online() {
      self.handle(Transition::WentOnline).await;
    }

    loop {
      tokio::select! {
        received = transitions.recv() => match received {
          Ok(transition) => self.handle(transition).await,
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, "Missed connectivity transitions, resyncing");
            let transition = if self.connectivity.is_online() {
              Transition::WentOnline
            } else {
              Transition::WentOffline
            };
            self.handle(transition).await;
          }
          Err(broadcast::error::RecvError::Closed) => break,
        },
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
      }
    }

    debug!("Sync coordinator stopped");
  }
}
