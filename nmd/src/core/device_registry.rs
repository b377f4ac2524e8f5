//! The set of live devices.
//!
//! Devices are kept in insertion order and every lookup is a linear scan
//! returning the first match, so results are reproducible. Identifiers come
//! from a counter that never goes back, so a stale [`DeviceId`] resolves to
//! nothing instead of to an unrelated device.

use thiserror::Error;

use super::device::Device;
use crate::api::models::DeviceId;

/// Rejected registrations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum RegistryError {
    #[error("a device with udi {0} is already registered")]
    DuplicateUdi(String),
    #[error("a device with ifindex {0} is already registered")]
    DuplicateIfindex(i32),
}

#[derive(Debug)]
pub(crate) struct DeviceRegistry {
    devices: Vec<Device>,
    next_id: u64,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            next_id: 1,
        }
    }
}

impl DeviceRegistry {
    /// Registers a device and assigns its identifier.
    pub(crate) fn add(&mut self, mut device: Device) -> Result<DeviceId, RegistryError> {
        if self.by_udi(device.udi()).is_some() {
            return Err(RegistryError::DuplicateUdi(device.udi().to_string()));
        }
        if let Some(ifindex) = device.ifindex()
            && self.by_ifindex(ifindex).is_some()
        {
            return Err(RegistryError::DuplicateIfindex(ifindex));
        }
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        device.id = id;
        self.devices.push(device);
        Ok(id)
    }

    /// Drops a device from the set.
    pub(crate) fn remove(&mut self, id: DeviceId) -> Option<Device> {
        let pos = self.devices.iter().position(|d| d.id == id)?;
        Some(self.devices.remove(pos))
    }

    pub(crate) fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    /// Identifiers in insertion order, for loops that mutate the registry.
    pub(crate) fn ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|d| d.id).collect()
    }

    pub(crate) fn by_udi(&self, udi: &str) -> Option<DeviceId> {
        self.devices.iter().find(|d| d.udi() == udi).map(|d| d.id)
    }

    pub(crate) fn by_ifindex(&self, ifindex: i32) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|d| d.ifindex() == Some(ifindex))
            .map(|d| d.id)
    }

    pub(crate) fn by_iface(&self, iface: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|d| d.interface() == iface)
            .map(|d| d.id)
    }

    pub(crate) fn by_ip_iface(&self, ip_iface: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|d| d.ip_interface() == ip_iface)
            .map(|d| d.id)
    }

    /// Finds the device named `master`, optionally restricted to a driver.
    pub(crate) fn by_master(&self, master: &str, driver: Option<&str>) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|d| d.interface() == master && driver.is_none_or(|drv| d.driver() == Some(drv)))
            .map(|d| d.id)
    }

    /// A device registered before its kernel link existed.
    pub(crate) fn unrealized_by_iface(&self, iface: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|d| !d.is_realized() && d.interface() == iface)
            .map(|d| d.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LinkType, PlatformLink};
    use crate::core::device::DeviceKind;

    fn link(ifindex: i32, name: &str) -> PlatformLink {
        PlatformLink::new(ifindex, name, LinkType::Ethernet)
            .with_udi(format!("/sys/class/net/{name}"))
            .with_driver("e1000e")
    }

    #[test]
    fn rejects_duplicate_identity() {
        let mut reg = DeviceRegistry::default();
        let a = reg.add(Device::from_link(&link(5, "eth0"), DeviceKind::Ethernet)).unwrap();
        assert_eq!(a, DeviceId(1));

        let same_udi = Device::from_link(&link(6, "eth0"), DeviceKind::Ethernet);
        assert!(matches!(reg.add(same_udi), Err(RegistryError::DuplicateUdi(_))));

        let mut same_index = link(5, "eth1");
        same_index.udi = Some("/sys/class/net/other".into());
        assert_eq!(
            reg.add(Device::from_link(&same_index, DeviceKind::Ethernet)),
            Err(RegistryError::DuplicateIfindex(5))
        );
        assert_eq!(reg.ids().len(), 1);
    }

    #[test]
    fn identifiers_are_not_reused() {
        let mut reg = DeviceRegistry::default();
        let a = reg.add(Device::from_link(&link(5, "eth0"), DeviceKind::Ethernet)).unwrap();
        reg.remove(a).unwrap();
        let b = reg.add(Device::from_link(&link(5, "eth0"), DeviceKind::Ethernet)).unwrap();
        assert_ne!(a, b);
        assert!(reg.get(a).is_none());
    }

    #[test]
    fn lookups_return_first_match() {
        let mut reg = DeviceRegistry::default();
        let eth0 = reg.add(Device::from_link(&link(5, "eth0"), DeviceKind::Ethernet)).unwrap();
        let ppp = Device::from_link(&link(7, "ttyUSB0"), DeviceKind::Modem).with_ip_interface("ppp0");
        let modem = reg.add(ppp).unwrap();

        assert_eq!(reg.by_ifindex(5), Some(eth0));
        assert_eq!(reg.by_iface("eth0"), Some(eth0));
        assert_eq!(reg.by_ip_iface("ppp0"), Some(modem));
        assert_eq!(reg.by_ip_iface("eth0"), Some(eth0));
        assert_eq!(reg.by_master("eth0", Some("e1000e")), Some(eth0));
        assert_eq!(reg.by_master("eth0", Some("igb")), None);
        assert_eq!(reg.by_master("eth0", None), Some(eth0));
        assert_eq!(reg.ids(), vec![eth0, modem]);
    }

    #[test]
    fn unrealized_devices_have_no_index() {
        let mut reg = DeviceRegistry::default();
        let bond = reg.add(Device::unrealized("bond0", DeviceKind::Bond)).unwrap();
        assert_eq!(reg.unrealized_by_iface("bond0"), Some(bond));
        assert_eq!(reg.by_udi("/virtual/device/bond0"), Some(bond));
    }
}
