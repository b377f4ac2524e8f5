//! Aggregate state and connectivity.

use futures::FutureExt;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::active_connection::{ActiveConnection, ActiveConnectionSet};
use super::manager::{Completion, Manager, Operation, Reply};
use crate::Result;
use crate::api::models::{ActiveConnectionState, ConnectivityState, NmState, Permission, Subject};
use crate::monitoring::events::ManagerEvent;

/// Derives the global state from the active connections.
///
/// `connectivity` is the last completed check while a default route
/// exists; `Unknown` means a check is still outstanding.
pub(crate) fn derive_state(
    networking_off: bool,
    acs: &ActiveConnectionSet,
    connectivity: ConnectivityState,
) -> NmState {
    if networking_off {
        return NmState::Asleep;
    }
    let activated = |ac: &&ActiveConnection| ac.state == ActiveConnectionState::Activated;
    if acs.iter().filter(activated).any(|ac| ac.has_default_route()) {
        return match connectivity {
            ConnectivityState::Full => NmState::ConnectedGlobal,
            ConnectivityState::Portal | ConnectivityState::Limited => NmState::ConnectedSite,
            ConnectivityState::None => NmState::ConnectedLocal,
            ConnectivityState::Unknown => NmState::Connecting,
        };
    }
    if acs.iter().any(|ac| ac.state == ActiveConnectionState::Activated) {
        NmState::ConnectedLocal
    } else if acs
        .iter()
        .any(|ac| ac.state == ActiveConnectionState::Activating && !ac.assumed)
    {
        NmState::Connecting
    } else if acs
        .iter()
        .any(|ac| ac.state == ActiveConnectionState::Deactivating && !ac.assumed)
    {
        NmState::Disconnecting
    } else {
        NmState::Disconnected
    }
}

/// Result of the last connectivity check and the checks in flight.
#[derive(Debug, Default)]
pub(crate) struct ConnectivityCache {
    pub(crate) state: ConnectivityState,
    /// Bumped whenever the cached result stops being meaningful, so late
    /// answers from older checks are recognised.
    pub(crate) generation: u64,
    pub(crate) in_flight: Option<u64>,
    pub(crate) waiters: Vec<oneshot::Sender<Result<ConnectivityState>>>,
    had_default_route: bool,
}

impl Manager {
    fn has_default_route(&self) -> bool {
        self.acs.iter().any(|ac| {
            ac.state == ActiveConnectionState::Activated && ac.has_default_route()
        })
    }

    /// Recomputes the global state, notifying only when it changes.
    pub(crate) fn update_state(&mut self) {
        let default_route = self.has_default_route();
        if default_route != self.connectivity.had_default_route {
            self.connectivity.had_default_route = default_route;
            self.connectivity.generation += 1;
            if self.connectivity.state != ConnectivityState::Unknown {
                self.connectivity.state = ConnectivityState::Unknown;
                self.emit(ManagerEvent::ConnectivityChanged(ConnectivityState::Unknown));
            }
            if default_route {
                self.start_connectivity_check();
            }
        }

        let state = derive_state(
            self.manager_sleeping(),
            &self.acs,
            self.connectivity.state,
        );
        if state != self.state {
            info!("NetworkManager state is now {state}");
            self.state = state;
            self.emit(ManagerEvent::StateChanged(state));
        }
    }

    pub(crate) fn state(&mut self) -> NmState {
        self.update_state();
        self.state
    }

    pub(crate) fn connectivity(&self) -> ConnectivityState {
        self.connectivity.state
    }

    /// Asks for a fresh check and answers with its result.
    pub(crate) fn check_connectivity(&mut self, subject: &Subject) -> Reply<ConnectivityState> {
        let (reply, answer) = Reply::channel();
        self.request_operation(
            subject,
            Permission::NetworkControl,
            Operation::CheckConnectivity { reply },
        );
        answer
    }

    pub(super) fn start_connectivity_check(&mut self) {
        if self.connectivity.in_flight.is_some() {
            return;
        }
        let generation = self.connectivity.generation;
        self.connectivity.in_flight = Some(generation);
        debug!("starting connectivity check");
        let checker = Arc::clone(&self.checker);
        self.tasks.push(
            async move {
                Completion::Connectivity {
                    generation,
                    state: checker.check().await,
                }
            }
            .boxed(),
        );
    }

    pub(super) fn periodic_connectivity_check(&mut self) {
        if self.has_default_route() {
            self.start_connectivity_check();
        }
    }

    pub(super) fn connectivity_checked(&mut self, generation: u64, state: ConnectivityState) {
        if self.connectivity.in_flight == Some(generation) {
            self.connectivity.in_flight = None;
        }
        if generation != self.connectivity.generation {
            debug!("discarding stale connectivity result {state}");
            if !self.connectivity.waiters.is_empty() || self.has_default_route() {
                self.start_connectivity_check();
            }
            return;
        }

        debug!("connectivity check result: {state}");
        let state = if self.has_default_route() {
            state
        } else {
            ConnectivityState::None
        };
        for waiter in self.connectivity.waiters.drain(..) {
            let _ = waiter.send(Ok(state));
        }
        if !self.has_default_route() {
            return;
        }
        if state != self.connectivity.state {
            self.connectivity.state = state;
            self.emit(ManagerEvent::ConnectivityChanged(state));
        }
        self.update_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::profile::{ConnectionProfile, ConnectionType};

    fn set_with(states: &[(ActiveConnectionState, bool, bool)]) -> ActiveConnectionSet {
        let mut set = ActiveConnectionSet::default();
        for (i, (state, default4, assumed)) in states.iter().enumerate() {
            let id = set.allocate_id();
            let profile = ConnectionProfile::new(format!("c{i}"), ConnectionType::Ethernet);
            let mut ac = ActiveConnection::new(id, profile, None, Subject::Internal);
            ac.default4 = *default4;
            ac.assumed = *assumed;
            set.add(ac);
            set.set_state(id, *state);
        }
        set
    }

    #[test]
    fn asleep_short_circuits() {
        let set = set_with(&[(ActiveConnectionState::Activated, true, false)]);
        assert_eq!(derive_state(true, &set, ConnectivityState::Full), NmState::Asleep);
    }

    #[test]
    fn default_route_maps_connectivity() {
        let set = set_with(&[(ActiveConnectionState::Activated, true, false)]);
        assert_eq!(
            derive_state(false, &set, ConnectivityState::Full),
            NmState::ConnectedGlobal
        );
        assert_eq!(
            derive_state(false, &set, ConnectivityState::Portal),
            NmState::ConnectedSite
        );
        assert_eq!(
            derive_state(false, &set, ConnectivityState::None),
            NmState::ConnectedLocal
        );
        assert_eq!(
            derive_state(false, &set, ConnectivityState::Unknown),
            NmState::Connecting
        );
    }

    #[test]
    fn without_default_route() {
        let local = set_with(&[(ActiveConnectionState::Activated, false, false)]);
        assert_eq!(
            derive_state(false, &local, ConnectivityState::Unknown),
            NmState::ConnectedLocal
        );

        let connecting = set_with(&[(ActiveConnectionState::Activating, false, false)]);
        assert_eq!(
            derive_state(false, &connecting, ConnectivityState::Unknown),
            NmState::Connecting
        );

        let assumed = set_with(&[(ActiveConnectionState::Activating, false, true)]);
        assert_eq!(
            derive_state(false, &assumed, ConnectivityState::Unknown),
            NmState::Disconnected
        );

        let leaving = set_with(&[(ActiveConnectionState::Deactivating, false, false)]);
        assert_eq!(
            derive_state(false, &leaving, ConnectivityState::Unknown),
            NmState::Disconnecting
        );
    }

    #[test]
    fn derivation_is_repeatable() {
        let set = set_with(&[
            (ActiveConnectionState::Activating, false, false),
            (ActiveConnectionState::Activated, true, false),
        ]);
        let first = derive_state(false, &set, ConnectivityState::Limited);
        assert_eq!(first, derive_state(false, &set, ConnectivityState::Limited));
        assert_eq!(first, NmState::ConnectedSite);
    }
}
