//! Two-state connectivity machine driven by platform reachability signals.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Current reachability of the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

impl Connectivity {
  pub fn from_online(online: bool) -> Self {
    if online {
      Connectivity::Online
    } else {
      Connectivity::Offline
    }
  }

  pub fn is_online(self) -> bool {
    self == Connectivity::Online
  }
}

/// A change between the two connectivity states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  WentOnline,
  WentOffline,
}

impl Transition {
  /// The transition from `from` to `to`, if the state actually changed.
  pub fn between(from: Connectivity, to: Connectivity) -> Option<Self> {
    match (from, to) {
      (Connectivity::Offline, Connectivity::Online) => Some(Transition::WentOnline),
      (Connectivity::Online, Connectivity::Offline) => Some(Transition::WentOffline),
      _ => None,
    }
  }
}

/// Transitions buffered per subscriber before it starts lagging.
const TRANSITION_BUFFER: usize = 64;

/// Shared handle to the connectivity state.
///
/// Platform signals call [`set`](Self::set); stores read the current state to
/// decide whether writes must be queued. Every transition is also published
/// as its own event, so a subscriber busy draining still sees an
/// Online→Offline→Online flap as two transitions.
#[derive(Clone)]
pub struct ConnectivityHandle {
  state: Arc<watch::Sender<Connectivity>>,
  transitions: broadcast::Sender<Transition>,
}

impl ConnectivityHandle {
  pub fn new(initial: Connectivity) -> Self {
    let (state, _rx) = watch::channel(initial);
    let (transitions, _rx) = broadcast::channel(TRANSITION_BUFFER);
    Self {
      state: Arc::new(state),
      transitions,
    }
  }

  pub fn current(&self) -> Connectivity {
    *self.state.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.current().is_online()
  }

  /// Record a reachability signal. Returns the transition it caused, if any.
  pub fn set(&self, next: Connectivity) -> Option<Transition> {
    let mut transition = None;
    self.state.send_if_modified(|state| {
      transition = Transition::between(*state, next);
      if let Some(t) = transition {
        *state = next;
        // Published under the state lock so events keep the order of changes;
        // an error only means nobody is subscribed
        let _ = self.transitions.send(t);
      }
      transition.is_some()
    });
    transition
  }

  /// Subscribe to transitions made after this call.
  pub fn transitions(&self) -> broadcast::Receiver<Transition> {
    self.transitions.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transitions() {
    let handle = ConnectivityHandle::new(Connectivity::Offline);
    assert!(!handle.is_online());

    assert_eq!(handle.set(Connectivity::Offline), None);
    assert_eq!(handle.set(Connectivity::Online), Some(Transition::WentOnline));
    assert_eq!(handle.set(Connectivity::Online), None);
    assert_eq!(handle.set(Connectivity::Offline), Some(Transition::WentOffline));
  }

  #[tokio::test]
  async fn test_every_transition_is_delivered() {
    let handle = ConnectivityHandle::new(Connectivity::Online);
    let mut rx = handle.transitions();

    handle.set(Connectivity::Offline);
    handle.set(Connectivity::Offline);
    handle.set(Connectivity::Online);

    assert_eq!(rx.recv().await.unwrap(), Transition::WentOffline);
    assert_eq!(rx.recv().await.unwrap(), Transition::WentOnline);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_clones_share_state() {
    let handle = ConnectivityHandle::new(Connectivity::Offline);
    let other = handle.clone();
    other.set(Connectivity::Online);
    assert!(handle.is_online());
  }
}
