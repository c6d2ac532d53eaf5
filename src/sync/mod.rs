//! Connectivity-aware synchronization of offline mutations.
//!
//! - [`ConnectivityHandle`] tracks the Online/Offline state machine
//! - [`SyncCoordinator`] drains the pending-operation queue on reconnect
//! - Payloads are entity-escaped before they leave the device

mod connectivity;
mod coordinator;
mod remote;
pub mod sanitize;

pub use connectivity::{Connectivity, ConnectivityHandle, Transition};
pub use coordinator::{DrainReport, SyncCoordinator, SyncStatus};
pub use remote::{HttpRemote, SyncRemote, SYNC_PATH};

#[cfg(test)]
pub(crate) use coordinator::tests::RecordingRemote;
