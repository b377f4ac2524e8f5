//! Change notifications.
//!
//! The manager publishes every externally visible change as a
//! [`ManagerEvent`]. Subscribers receive them in emission order over an
//! unbounded channel; a subscriber that drops its receiver is forgotten on
//! the next emission.

use log::trace;
use tokio::sync::mpsc;

use crate::api::models::{
    ActiveConnectionId, ActiveConnectionState, ConnectionStateReason, ConnectivityState, DeviceId,
    DeviceState, DeviceStateReason, NmState, RfkillType,
};

/// A change published by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    DeviceAdded(DeviceId),
    DeviceRemoved(DeviceId),
    DeviceStateChanged {
        device: DeviceId,
        new: DeviceState,
        old: DeviceState,
        reason: DeviceStateReason,
    },
    ActiveConnectionAdded(ActiveConnectionId),
    ActiveConnectionStateChanged {
        active_connection: ActiveConnectionId,
        state: ActiveConnectionState,
        reason: ConnectionStateReason,
    },
    ActiveConnectionRemoved(ActiveConnectionId),
    StateChanged(NmState),
    ConnectivityChanged(ConnectivityState),
    PrimaryConnectionChanged(Option<ActiveConnectionId>),
    ActivatingConnectionChanged(Option<ActiveConnectionId>),
    NetworkingEnabledChanged(bool),
    SleepingChanged(bool),
    RadioEnabledChanged { radio: RfkillType, enabled: bool },
    StartupComplete,
}

/// Receiving half handed to subscribers.
pub type EventStream = mpsc::UnboundedReceiver<ManagerEvent>;

/// Fan-out of events to subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<ManagerEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: ManagerEvent) {
        trace!("event: {event:?}");
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order_and_forgets_closed() {
        let mut bus = EventBus::default();
        let mut a = bus.subscribe();
        let b = bus.subscribe();
        drop(b);

        bus.emit(ManagerEvent::StartupComplete);
        bus.emit(ManagerEvent::StateChanged(NmState::Disconnected));

        assert_eq!(bus.subscribers.len(), 1);
        assert_eq!(a.try_recv().ok(), Some(ManagerEvent::StartupComplete));
        assert_eq!(
            a.try_recv().ok(),
            Some(ManagerEvent::StateChanged(NmState::Disconnected))
        );
        assert!(a.try_recv().is_err());
    }
}
