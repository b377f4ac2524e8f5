//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use nmd::backend::auth::PolicyAuthorizer;
use nmd::backend::memory::{MemoryPlatform, MemoryStore};
use nmd::backend::{LinkConfig, LinkType, PlatformLink};
use nmd::{DeviceId, DeviceInfo, EventStream, ManagerEvent, NetworkManager, Subject};

/// An Ethernet link with carrier and a stable sysfs identity.
pub fn ethernet(ifindex: i32, name: &str) -> PlatformLink {
    PlatformLink::new(ifindex, name, LinkType::Ethernet)
        .with_udi(format!("/sys/devices/pci0000:00/0000:00:{ifindex:02x}.0/net/{name}"))
        .with_driver("e1000e")
        .with_hw_address(format!("52:54:00:12:34:{ifindex:02x}"))
        .with_carrier(true)
}

/// A DHCP lease holding the IPv4 default route.
pub fn dhcp(address: &str) -> LinkConfig {
    LinkConfig {
        ipv4_addresses: vec![address.to_string()],
        ipv4_dynamic: true,
        default4: true,
        ..LinkConfig::default()
    }
}

pub fn alice() -> Subject {
    Subject::user(1000, "alice")
}

pub fn bob() -> Subject {
    Subject::user(1001, "bob")
}

pub fn root() -> Subject {
    Subject::user(0, "root")
}

/// A manager that grants every permission.
pub fn manager(store: MemoryStore, platform: MemoryPlatform) -> NetworkManager {
    NetworkManager::builder()
        .store(store)
        .platform(platform)
        .authorizer(PolicyAuthorizer::allow_all())
        .build()
}

pub fn device(nm: &NetworkManager, iface: &str) -> DeviceInfo {
    nm.get_device_by_ip_iface(iface)
        .unwrap_or_else(|e| panic!("{iface} should exist: {e}"))
}

pub fn device_id(nm: &NetworkManager, iface: &str) -> DeviceId {
    device(nm, iface).id
}

/// Everything emitted since the last drain.
pub fn drain(events: &mut EventStream) -> Vec<ManagerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Index of the first event matching `pred`.
pub fn position(events: &[ManagerEvent], pred: impl Fn(&ManagerEvent) -> bool) -> Option<usize> {
    events.iter().position(pred)
}
