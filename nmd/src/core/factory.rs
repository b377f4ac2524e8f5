//! Link type to device constructor mapping.
//!
//! Factories are registered explicitly when the manager is built. For each
//! kernel link the registry asks the factories that list the link's type, in
//! priority order, and takes the first device produced. A factory error ends
//! the search for that link: the link is logged and skipped rather than
//! wrapped in a generic device that would fight the real owner for it.

use log::info;
use thiserror::Error;

use super::device::{Device, DeviceKind};
use crate::api::models::DeviceId;
use crate::backend::{LinkType, PlatformLink};
use crate::types::constants::ifname;

/// Facts about a link that only the registry of live devices can supply.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkContext {
    /// Device backing the link's `parent_ifindex`, if registered.
    pub parent: Option<DeviceId>,
}

/// Factory failures. Fatal for the link being created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    #[error("({iface}): parent link {ifindex} is not known")]
    MissingParent { iface: String, ifindex: i32 },
    #[error("({iface}): {reason}")]
    InvalidLink { iface: String, reason: String },
}

/// Constructs devices for one or more link types.
pub trait DeviceFactory: Send {
    /// Name used in log messages.
    fn name(&self) -> &'static str;

    /// Link types this factory wants to see.
    fn link_types(&self) -> &'static [LinkType];

    /// Higher values are consulted first.
    fn priority(&self) -> i32 {
        0
    }

    /// Builds a device for `link`, or declines with `Ok(None)`.
    fn create_device(
        &self,
        link: &PlatformLink,
        ctx: &LinkContext,
    ) -> Result<Option<Device>, FactoryError>;
}

/// Link types that never get a device of their own.
const EXCLUDED_LINK_TYPES: &[LinkType] = &[LinkType::Loopback, LinkType::WwanEthernet];

/// Link types whose real support lives in an optional factory.
const PLUGIN_LINK_TYPES: &[LinkType] = &[LinkType::Wifi, LinkType::OlpcMesh, LinkType::Wimax];

#[derive(Default)]
pub struct DeviceFactoryRegistry {
    factories: Vec<Box<dyn DeviceFactory>>,
}

impl std::fmt::Debug for DeviceFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|fac| fac.name()))
            .finish()
    }
}

impl DeviceFactoryRegistry {
    /// A registry with the wired and software factories.
    pub fn with_builtin() -> Self {
        let mut reg = Self::default();
        reg.register(Box::new(EthernetFactory));
        reg.register(Box::new(InfinibandFactory));
        reg.register(Box::new(SoftwareFactory));
        reg.register(Box::new(VlanFactory));
        reg
    }

    /// Adds a factory. Among equal priorities the earlier registration wins.
    pub fn register(&mut self, factory: Box<dyn DeviceFactory>) {
        let pos = self
            .factories
            .iter()
            .position(|f| f.priority() < factory.priority())
            .unwrap_or(self.factories.len());
        self.factories.insert(pos, factory);
    }

    /// Creates the device for a link.
    ///
    /// Returns `Ok(None)` for links that must not be wrapped at all.
    pub fn create_for_link(
        &self,
        link: &PlatformLink,
        ctx: &LinkContext,
    ) -> Result<Option<Device>, FactoryError> {
        for factory in self
            .factories
            .iter()
            .filter(|f| f.link_types().contains(&link.link_type))
        {
            if let Some(device) = factory.create_device(link, ctx)? {
                return Ok(Some(device));
            }
        }

        if ifname::IGNORED_PREFIXES
            .iter()
            .any(|prefix| link.name.starts_with(prefix))
        {
            return Ok(None);
        }
        if EXCLUDED_LINK_TYPES.contains(&link.link_type) {
            return Ok(None);
        }
        if PLUGIN_LINK_TYPES.contains(&link.link_type) {
            info!(
                "({}): '{}' plugin not available; creating generic device",
                link.name, link.link_type
            );
        }
        Ok(Some(Device::from_link(
            link,
            DeviceKind::Generic {
                link_type: link.link_type,
            },
        )))
    }
}

struct EthernetFactory;

impl DeviceFactory for EthernetFactory {
    fn name(&self) -> &'static str {
        "ethernet"
    }

    fn link_types(&self) -> &'static [LinkType] {
        &[LinkType::Ethernet, LinkType::Veth]
    }

    fn create_device(
        &self,
        link: &PlatformLink,
        _ctx: &LinkContext,
    ) -> Result<Option<Device>, FactoryError> {
        let kind = match link.link_type {
            LinkType::Veth => DeviceKind::Veth,
            _ => DeviceKind::Ethernet,
        };
        Ok(Some(Device::from_link(link, kind)))
    }
}

struct InfinibandFactory;

impl DeviceFactory for InfinibandFactory {
    fn name(&self) -> &'static str {
        "infiniband"
    }

    fn link_types(&self) -> &'static [LinkType] {
        &[LinkType::Infiniband]
    }

    fn create_device(
        &self,
        link: &PlatformLink,
        ctx: &LinkContext,
    ) -> Result<Option<Device>, FactoryError> {
        let parent = match link.parent_ifindex {
            Some(ifindex) => Some(ctx.parent.ok_or_else(|| FactoryError::MissingParent {
                iface: link.name.clone(),
                ifindex,
            })?),
            None => None,
        };
        let kind = DeviceKind::Infiniband {
            parent,
            p_key: link.p_key,
        };
        Ok(Some(Device::from_link(link, kind)))
    }
}

/// Interfaces that exist only in software and carry no parent.
struct SoftwareFactory;

impl DeviceFactory for SoftwareFactory {
    fn name(&self) -> &'static str {
        "software"
    }

    fn link_types(&self) -> &'static [LinkType] {
        &[
            LinkType::Bond,
            LinkType::Bridge,
            LinkType::Team,
            LinkType::Tun,
            LinkType::Macvlan,
            LinkType::Vxlan,
            LinkType::Gre,
        ]
    }

    fn create_device(
        &self,
        link: &PlatformLink,
        ctx: &LinkContext,
    ) -> Result<Option<Device>, FactoryError> {
        let kind = match link.link_type {
            LinkType::Bond => DeviceKind::Bond,
            LinkType::Bridge => DeviceKind::Bridge,
            LinkType::Team => DeviceKind::Team,
            LinkType::Tun => DeviceKind::Tun,
            LinkType::Macvlan => DeviceKind::Macvlan { parent: ctx.parent },
            LinkType::Vxlan => DeviceKind::Vxlan,
            LinkType::Gre => DeviceKind::IpTunnel,
            _ => return Ok(None),
        };
        Ok(Some(Device::from_link(link, kind)))
    }
}

struct VlanFactory;

impl DeviceFactory for VlanFactory {
    fn name(&self) -> &'static str {
        "vlan"
    }

    fn link_types(&self) -> &'static [LinkType] {
        &[LinkType::Vlan]
    }

    fn create_device(
        &self,
        link: &PlatformLink,
        ctx: &LinkContext,
    ) -> Result<Option<Device>, FactoryError> {
        let Some(vlan_id) = link.vlan_id else {
            return Err(FactoryError::InvalidLink {
                iface: link.name.clone(),
                reason: "VLAN link without a VLAN id".into(),
            });
        };
        let Some(ifindex) = link.parent_ifindex else {
            return Err(FactoryError::InvalidLink {
                iface: link.name.clone(),
                reason: "VLAN link without a parent".into(),
            });
        };
        let parent = ctx.parent.ok_or_else(|| FactoryError::MissingParent {
            iface: link.name.clone(),
            ifindex,
        })?;
        let kind = DeviceKind::Vlan {
            parent: Some(parent),
            vlan_id,
        };
        Ok(Some(Device::from_link(link, kind)))
    }
}

/// Factory for radio devices: Wi-Fi, OLPC mesh and WiMAX.
///
/// Not part of [`DeviceFactoryRegistry::with_builtin`]; hosts that drive
/// radios register it explicitly.
pub struct WirelessFactory;

impl DeviceFactory for WirelessFactory {
    fn name(&self) -> &'static str {
        "wireless"
    }

    fn link_types(&self) -> &'static [LinkType] {
        PLUGIN_LINK_TYPES
    }

    fn create_device(
        &self,
        link: &PlatformLink,
        _ctx: &LinkContext,
    ) -> Result<Option<Device>, FactoryError> {
        let kind = match link.link_type {
            LinkType::Wifi => DeviceKind::Wifi,
            LinkType::OlpcMesh => DeviceKind::OlpcMesh,
            LinkType::Wimax => DeviceKind::Wimax,
            _ => return Ok(None),
        };
        Ok(Some(Device::from_link(link, kind)))
    }
}
