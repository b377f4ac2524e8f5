//! Global state, connectivity, sleep and radio handling.

mod common;

use common::{alice, device, device_id, dhcp, drain, ethernet, manager, position, root};
use nmd::backend::auth::PolicyAuthorizer;
use nmd::backend::connectivity::StaticConnectivity;
use nmd::backend::memory::{MemoryPlatform, MemoryStore, StaticRfkill};
use nmd::backend::{LinkType, PlatformLink};
use nmd::builders::ProfileBuilder;
use nmd::{
    ActiveConnectionState, AuthResult, ConnectionType, ConnectivityState, DeviceState,
    ManagerError, ManagerEvent, NetworkManager, NmState, Permission, RfkillState, RfkillType,
    StateFile, WirelessFactory,
};

fn wlan(ifindex: i32) -> PlatformLink {
    PlatformLink::new(ifindex, "wlan0", LinkType::Wifi)
        .with_driver("iwlwifi")
        .with_hw_address("00:1b:21:0a:0b:0c")
}

#[test]
fn test_state_follows_default_route_and_connectivity() {
    let platform = MemoryPlatform::with_links([ethernet(5, "eth0").with_config(dhcp("192.168.1.10/24"))]);
    let checker = StaticConnectivity::new(ConnectivityState::Portal);
    let mut nm = NetworkManager::builder()
        .platform(platform)
        .connectivity(checker.clone())
        .authorizer(PolicyAuthorizer::allow_all())
        .build();
    nm.start();

    assert_eq!(nm.state(), NmState::Connecting);
    assert_eq!(nm.connectivity(), ConnectivityState::Unknown);
    nm.settle();
    assert_eq!(nm.connectivity(), ConnectivityState::Portal);
    assert_eq!(nm.state(), NmState::ConnectedSite);

    checker.set(ConnectivityState::Full);
    let mut reply = nm.check_connectivity(&alice());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(ConnectivityState::Full)));
    assert_eq!(nm.state(), NmState::ConnectedGlobal);
}

#[test]
fn test_connectivity_without_default_route() {
    let mut nm = manager(MemoryStore::new(), MemoryPlatform::with_links([ethernet(2, "eth0")]));
    nm.start();
    let mut reply = nm.check_connectivity(&alice());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(ConnectivityState::None)));
    assert_eq!(nm.state(), NmState::Disconnected);
}

#[test]
fn test_local_only_connection() {
    let platform = MemoryPlatform::with_links([ethernet(5, "eth0").with_config(dhcp("10.9.0.3/24"))]);
    let mut nm = manager(MemoryStore::new(), platform);
    nm.start();
    nm.settle();
    let ac = nm.primary_connection().unwrap();

    nm.set_default_route(ac, false, false).unwrap();
    assert_eq!(nm.primary_connection(), None);
    assert_eq!(nm.state(), NmState::ConnectedLocal);
}

#[test]
fn test_reading_state_twice_emits_nothing() {
    let mut nm = manager(MemoryStore::new(), MemoryPlatform::with_links([ethernet(2, "eth0")]));
    nm.start();
    let first = nm.state();
    let mut events = nm.subscribe();
    assert_eq!(nm.state(), first);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn test_deactivated_connection_is_removed_on_idle() {
    let platform = MemoryPlatform::with_links([ethernet(5, "eth0").with_config(dhcp("192.168.1.10/24"))]);
    let mut nm = manager(MemoryStore::new(), platform);
    nm.start();
    nm.settle();
    let ac = nm.primary_connection().unwrap();
    let mut events = nm.subscribe();

    let mut reply = nm.deactivate_connection(ac, &nmd::Subject::Internal);
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert_eq!(
        nm.active_connection(ac).unwrap().state,
        ActiveConnectionState::Deactivated
    );
    assert_eq!(device(&nm, "eth0").state, DeviceState::Disconnected);
    assert_eq!(nm.state(), NmState::Disconnected);

    nm.settle();
    assert!(nm.active_connection(ac).is_none());
    assert!(drain(&mut events).contains(&ManagerEvent::ActiveConnectionRemoved(ac)));

    let mut again = nm.deactivate_connection(ac, &alice());
    assert!(matches!(
        again.try_take(),
        Some(Err(ManagerError::ConnectionNotActive(_)))
    ));
}

#[test]
fn test_sleep_tears_down_activations() {
    let profile = ProfileBuilder::new(ConnectionType::Ethernet, "Wired")
        .ipv4_auto()
        .build();
    let uuid = profile.uuid.clone();
    let mut nm = manager(
        MemoryStore::with_connections([profile]),
        MemoryPlatform::with_links([ethernet(2, "eth0")]),
    );
    nm.start();
    let eth0 = device_id(&nm, "eth0");
    let mut handle = nm.activate_connection(&uuid, Some(eth0), None, &alice()).unwrap();
    nm.settle();
    let ac = handle.reply.try_take().unwrap().unwrap();
    assert_eq!(nm.state(), NmState::Connecting);

    let mut events = nm.subscribe();
    let mut reply = nm.sleep(true, &root());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert!(nm.sleeping());
    assert_eq!(nm.state(), NmState::Asleep);
    assert_eq!(device(&nm, "eth0").state, DeviceState::Unmanaged);

    let events = drain(&mut events);
    let state_of = |wanted: ActiveConnectionState| {
        position(&events, |e| {
            matches!(e, ManagerEvent::ActiveConnectionStateChanged {
                active_connection,
                state,
                ..
            } if *active_connection == ac && *state == wanted)
        })
        .unwrap()
    };
    let deactivating = state_of(ActiveConnectionState::Deactivating);
    let deactivated = state_of(ActiveConnectionState::Deactivated);
    let removed = position(&events, |e| *e == ManagerEvent::ActiveConnectionRemoved(ac)).unwrap();
    assert!(deactivating < deactivated && deactivated < removed);
    assert!(events.contains(&ManagerEvent::SleepingChanged(true)));

    let mut reply = nm.sleep(false, &root());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert!(!nm.sleeping());
    assert_eq!(device(&nm, "eth0").state, DeviceState::Disconnected);
    assert_eq!(nm.state(), NmState::Disconnected);
}

#[test]
fn test_sleep_twice_is_harmless() {
    let mut nm = manager(MemoryStore::new(), MemoryPlatform::with_links([ethernet(2, "eth0")]));
    nm.start();
    let mut first = nm.sleep(true, &nmd::Subject::Internal);
    assert_eq!(first.try_take(), Some(Ok(())));
    let mut events = nm.subscribe();
    let mut second = nm.sleep(true, &nmd::Subject::Internal);
    assert_eq!(second.try_take(), Some(Ok(())));
    assert!(drain(&mut events).is_empty());
}

#[test]
fn test_wake_on_lan_device_stays_up_while_asleep() {
    let platform = MemoryPlatform::with_links([ethernet(2, "eth0"), ethernet(3, "eth1")]);
    platform.set_wake_on_lan(2, true);
    let mut nm = manager(MemoryStore::new(), platform.clone());
    nm.start();

    let mut reply = nm.sleep(true, &root());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert_eq!(device(&nm, "eth0").state, DeviceState::Disconnected);
    assert_eq!(device(&nm, "eth1").state, DeviceState::Unmanaged);

    let mut reply = nm.sleep(false, &root());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert_eq!(platform.downed(), vec![2]);
    assert_eq!(device(&nm, "eth0").state, DeviceState::Disconnected);
    assert_eq!(device(&nm, "eth1").state, DeviceState::Disconnected);
}

#[test]
fn test_networking_disable_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("NetworkManager.state");

    let mut nm = NetworkManager::builder()
        .platform(MemoryPlatform::with_links([ethernet(2, "eth0")]))
        .state_file(StateFile::load(&path))
        .build();
    nm.start();

    let mut denied = nm.enable(false, &alice());
    nm.settle();
    assert!(matches!(
        denied.try_take(),
        Some(Err(ManagerError::PermissionDenied(_)))
    ));
    assert!(nm.networking_enabled());

    let mut reply = nm.enable(false, &root());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert!(!nm.networking_enabled());
    assert!(!nm.sleeping());
    assert_eq!(nm.state(), NmState::Asleep);
    assert_eq!(device(&nm, "eth0").state, DeviceState::Unmanaged);

    let stored = StateFile::load(&path);
    assert!(!stored.state().networking_enabled);
    assert!(stored.state().wireless_enabled);

    let mut restarted = NetworkManager::builder()
        .platform(MemoryPlatform::with_links([ethernet(2, "eth0")]))
        .state_file(stored)
        .build();
    restarted.start();
    assert!(!restarted.networking_enabled());
    assert_eq!(restarted.state(), NmState::Asleep);
    assert_eq!(device(&restarted, "eth0").state, DeviceState::Unmanaged);
}

#[test]
fn test_hardware_kill_switch_blocks_wifi() {
    let rfkill = StaticRfkill::new();
    rfkill.set(RfkillType::Wlan, RfkillState::HardBlocked);
    let mut nm = NetworkManager::builder()
        .platform(MemoryPlatform::with_links([wlan(3)]))
        .rfkill(rfkill.clone())
        .factory(WirelessFactory)
        .authorizer(PolicyAuthorizer::allow_all())
        .build();
    nm.start();

    assert_eq!(device(&nm, "wlan0").state, DeviceState::Unavailable);
    assert!(!nm.radio_hardware_enabled(RfkillType::Wlan));
    assert!(nm.radio_enabled(RfkillType::Wlan));

    let mut events = nm.subscribe();
    rfkill.set(RfkillType::Wlan, RfkillState::Unblocked);
    nm.rfkill_changed();
    assert_eq!(device(&nm, "wlan0").state, DeviceState::Disconnected);
    assert!(nm.radio_hardware_enabled(RfkillType::Wlan));
    assert!(drain(&mut events).contains(&ManagerEvent::RadioEnabledChanged {
        radio: RfkillType::Wlan,
        enabled: true,
    }));
}

#[test]
fn test_user_can_switch_radio_off() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("NetworkManager.state");
    let mut nm = NetworkManager::builder()
        .platform(MemoryPlatform::with_links([wlan(3), ethernet(2, "eth0")]))
        .factory(WirelessFactory)
        .state_file(StateFile::load(&path))
        .authorizer(PolicyAuthorizer::allow_all())
        .build();
    nm.start();
    assert_eq!(device(&nm, "wlan0").state, DeviceState::Disconnected);

    let mut reply = nm.set_radio_enabled(RfkillType::Wlan, false, &alice());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert!(!nm.radio_enabled(RfkillType::Wlan));
    assert_eq!(device(&nm, "wlan0").state, DeviceState::Unavailable);
    assert_eq!(device(&nm, "eth0").state, DeviceState::Disconnected);
    assert!(!StateFile::load(&path).state().wireless_enabled);

    let mut reply = nm.set_radio_enabled(RfkillType::Wlan, true, &alice());
    nm.settle();
    assert_eq!(reply.try_take(), Some(Ok(())));
    assert_eq!(device(&nm, "wlan0").state, DeviceState::Disconnected);
}

#[test]
fn test_permissions_are_reported_per_action() {
    let mut nm = NetworkManager::builder()
        .authorizer(
            PolicyAuthorizer::with_default(AuthResult::No)
                .permission(Permission::NetworkControl, AuthResult::Yes)
                .permission(Permission::SleepWake, AuthResult::Challenge),
        )
        .build();
    nm.start();

    let mut reply = nm.get_permissions(&alice());
    assert!(reply.try_take().is_none());
    nm.settle();
    let answers = reply.try_take().unwrap().unwrap();
    assert_eq!(answers.len(), Permission::ALL.len());
    for (permission, result) in answers {
        let expected = match permission {
            Permission::NetworkControl => AuthResult::Yes,
            Permission::SleepWake => AuthResult::Challenge,
            _ => AuthResult::No,
        };
        assert_eq!(result, expected, "{permission}");
    }

    let mut root_answers = nm.get_permissions(&root());
    nm.settle();
    assert!(
        root_answers
            .try_take()
            .unwrap()
            .unwrap()
            .iter()
            .all(|(_, r)| *r == AuthResult::Yes)
    );
}
