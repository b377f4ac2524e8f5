//! Device objects.
//!
//! A [`Device`] is the daemon's representative of one network interface. The
//! per-technology variants are a closed set ([`DeviceKind`]) behind one set
//! of capabilities: generating a profile from the running interface,
//! deciding whether a profile is compatible, and completing partial
//! profiles. Everything else about a device (its state, its active
//! connection, why it is unmanaged) is bookkeeping owned by the manager.

use log::debug;

use crate::api::models::{
    ActiveConnectionId, DeviceId, DeviceInfo, DeviceState, ManagerError, RfkillType,
    UnmanagedFlags,
};
use crate::api::builders::ProfileBuilder;
use crate::api::profile::{
    ConnectionProfile, ConnectionType, Ipv4Method, Ipv4Settings, Ipv6Method, Ipv6Settings,
    PartialProfile, unique_profile_name,
};
use crate::backend::{LinkConfig, LinkType, PlatformLink};
use crate::types::constants::{device_type, udi};
use crate::types::device_type_registry::{DeviceTypeInfo, get_device_type_info};
use crate::util::utils::{hw_addr_eq, is_ipv6_link_local};

/// Concrete device variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    Ethernet,
    Veth,
    Wifi,
    OlpcMesh,
    Wimax,
    Modem,
    Bluetooth,
    Infiniband { parent: Option<DeviceId>, p_key: Option<u16> },
    Bond,
    Bridge,
    Team,
    Vlan { parent: Option<DeviceId>, vlan_id: u16 },
    Tun,
    Macvlan { parent: Option<DeviceId> },
    Vxlan,
    IpTunnel,
    /// Wrapper for links no factory claimed; offers carrier detection only.
    Generic { link_type: LinkType },
}

impl DeviceKind {
    /// Exported device type code.
    pub fn type_code(&self) -> u32 {
        match self {
            Self::Ethernet => device_type::ETHERNET,
            Self::Veth => device_type::VETH,
            Self::Wifi => device_type::WIFI,
            Self::OlpcMesh => device_type::OLPC_MESH,
            Self::Wimax => device_type::WIMAX,
            Self::Modem => device_type::MODEM,
            Self::Bluetooth => device_type::BLUETOOTH,
            Self::Infiniband { .. } => device_type::INFINIBAND,
            Self::Bond => device_type::BOND,
            Self::Bridge => device_type::BRIDGE,
            Self::Team => device_type::TEAM,
            Self::Vlan { .. } => device_type::VLAN,
            Self::Tun => device_type::TUN,
            Self::Macvlan { .. } => device_type::MACVLAN,
            Self::Vxlan => device_type::VXLAN,
            Self::IpTunnel => device_type::IP_TUNNEL,
            Self::Generic { .. } => device_type::GENERIC,
        }
    }

    /// Kernel link type backing this variant.
    pub fn link_type(&self) -> LinkType {
        match self {
            Self::Ethernet | Self::Bluetooth => LinkType::Ethernet,
            Self::Veth => LinkType::Veth,
            Self::Wifi => LinkType::Wifi,
            Self::OlpcMesh => LinkType::OlpcMesh,
            Self::Wimax => LinkType::Wimax,
            Self::Modem => LinkType::WwanEthernet,
            Self::Infiniband { .. } => LinkType::Infiniband,
            Self::Bond => LinkType::Bond,
            Self::Bridge => LinkType::Bridge,
            Self::Team => LinkType::Team,
            Self::Vlan { .. } => LinkType::Vlan,
            Self::Tun => LinkType::Tun,
            Self::Macvlan { .. } => LinkType::Macvlan,
            Self::Vxlan => LinkType::Vxlan,
            Self::IpTunnel => LinkType::Gre,
            Self::Generic { link_type } => *link_type,
        }
    }

    /// Lower device for stacked variants.
    pub fn parent(&self) -> Option<DeviceId> {
        match self {
            Self::Vlan { parent, .. }
            | Self::Macvlan { parent }
            | Self::Infiniband { parent, .. } => *parent,
            _ => None,
        }
    }

    fn info(&self) -> Option<&'static dyn DeviceTypeInfo> {
        get_device_type_info(self.type_code())
    }

    /// Profile type the variant hosts.
    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.info().and_then(|i| i.connection_type())
    }
}

/// Facts needed to generate a profile that the device cannot know itself.
#[derive(Debug, Default)]
pub(crate) struct GenerationContext {
    /// Profile type of the master the interface is enslaved to.
    pub(crate) master_type: Option<ConnectionType>,
    /// Interface name of the parent of a stacked device.
    pub(crate) parent_iface: Option<String>,
}

/// One network interface.
#[derive(Debug, Clone)]
pub struct Device {
    pub(crate) id: DeviceId,
    udi: String,
    iface: String,
    ip_iface: Option<String>,
    ifindex: Option<i32>,
    kind: DeviceKind,
    driver: Option<String>,
    hw_address: Option<String>,
    carrier: bool,
    live_config: LinkConfig,
    firmware_missing: bool,
    pub(crate) state: DeviceState,
    pub(crate) unmanaged: UnmanagedFlags,
    pub(crate) act_request: Option<ActiveConnectionId>,
    pub(crate) queued_request: Option<ActiveConnectionId>,
    pub(crate) autoconnect: bool,
    pub(crate) radio_enabled: bool,
    pub(crate) nm_owned: bool,
    pub(crate) pending_actions: Vec<String>,
}

impl Device {
    /// Builds a device for a kernel link.
    pub fn from_link(link: &PlatformLink, kind: DeviceKind) -> Self {
        let mut device = Self::unrealized(link.name.clone(), kind);
        device.ifindex = Some(link.ifindex);
        if let Some(path) = &link.udi {
            device.udi = path.clone();
        }
        device.driver = link.driver.clone();
        device.hw_address = link.hw_address.clone();
        device.carrier = link.carrier;
        device.live_config = link.config.clone();
        device.firmware_missing = link.firmware_missing;
        device
    }

    /// Builds a device that has no kernel link yet.
    pub(crate) fn unrealized(iface: impl Into<String>, kind: DeviceKind) -> Self {
        let iface = iface.into();
        Self {
            id: DeviceId(0),
            udi: format!("{}{iface}", udi::VIRTUAL_PREFIX),
            iface,
            ip_iface: None,
            ifindex: None,
            kind,
            driver: None,
            hw_address: None,
            carrier: false,
            live_config: LinkConfig::default(),
            firmware_missing: false,
            state: DeviceState::Unmanaged,
            unmanaged: UnmanagedFlags::empty(),
            act_request: None,
            queued_request: None,
            autoconnect: true,
            radio_enabled: true,
            nm_owned: false,
            pending_actions: Vec::new(),
        }
    }

    /// Sets the interface IP traffic flows over, when it differs from the
    /// device interface (PPP over a modem port, for instance).
    pub fn with_ip_interface(mut self, ip_iface: impl Into<String>) -> Self {
        self.ip_iface = Some(ip_iface.into());
        self
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn udi(&self) -> &str {
        &self.udi
    }

    pub fn interface(&self) -> &str {
        &self.iface
    }

    pub fn ip_interface(&self) -> &str {
        self.ip_iface.as_deref().unwrap_or(&self.iface)
    }

    pub fn ifindex(&self) -> Option<i32> {
        self.ifindex
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn hw_address(&self) -> Option<&str> {
        self.hw_address.as_deref()
    }

    pub fn carrier(&self) -> bool {
        self.carrier
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub(crate) fn live_config(&self) -> &LinkConfig {
        &self.live_config
    }

    pub(crate) fn firmware_missing(&self) -> bool {
        self.firmware_missing
    }

    pub(crate) fn is_managed(&self) -> bool {
        self.unmanaged.is_empty()
    }

    pub(crate) fn is_realized(&self) -> bool {
        self.ifindex.is_some()
    }

    pub fn is_software(&self) -> bool {
        self.kind.info().is_some_and(|i| i.is_software())
    }

    pub(crate) fn rfkill_type(&self) -> Option<RfkillType> {
        self.kind.info().and_then(|i| i.rfkill_type())
    }

    pub(crate) fn supports_vlans(&self) -> bool {
        self.kind.info().is_some_and(|i| i.supports_vlans())
    }

    /// Whether a running configuration on this device can be adopted.
    pub(crate) fn can_assume_connections(&self) -> bool {
        self.kind.info().is_some_and(|i| i.supports_generation())
    }

    fn requires_carrier(&self) -> bool {
        self.kind.info().is_some_and(|i| i.requires_carrier())
    }

    /// Whether the device could activate a connection right now.
    ///
    /// User requests may start on a device still waiting for its carrier.
    pub(crate) fn is_available(&self, for_user: bool) -> bool {
        if self.firmware_missing {
            return false;
        }
        if self.rfkill_type().is_some() && !self.radio_enabled {
            return false;
        }
        for_user || self.carrier || !self.requires_carrier()
    }

    /// Binds a kernel link to a device created before the link existed.
    pub(crate) fn realize(&mut self, link: &PlatformLink) {
        self.ifindex = Some(link.ifindex);
        if let Some(path) = &link.udi {
            self.udi = path.clone();
        }
        self.apply_link(link);
    }

    /// Refreshes link facts. Returns `true` if the carrier changed.
    pub(crate) fn apply_link(&mut self, link: &PlatformLink) -> bool {
        let carrier_changed = self.carrier != link.carrier;
        if link.driver.is_some() {
            self.driver = link.driver.clone();
        }
        if link.hw_address.is_some() {
            self.hw_address = link.hw_address.clone();
        }
        self.carrier = link.carrier;
        self.live_config = link.config.clone();
        self.firmware_missing = link.firmware_missing;
        carrier_changed
    }

    pub(crate) fn add_pending_action(&mut self, action: &str) -> bool {
        if self.pending_actions.iter().any(|a| a == action) {
            return false;
        }
        self.pending_actions.push(action.to_string());
        true
    }

    pub(crate) fn remove_pending_action(&mut self, action: &str) -> bool {
        let before = self.pending_actions.len();
        self.pending_actions.retain(|a| a != action);
        before != self.pending_actions.len()
    }

    /// Decides whether `profile` could ever run on this device.
    ///
    /// `profile_parent` resolves the lower device a VLAN or partition
    /// profile refers to.
    pub(crate) fn check_compatible(
        &self,
        profile: &ConnectionProfile,
        profile_parent: impl FnOnce(&ConnectionProfile) -> Option<DeviceId>,
    ) -> bool {
        let Some(hosted) = self.kind.connection_type() else {
            return false;
        };
        if profile.connection_type != hosted {
            return false;
        }
        if let Some(name) = &profile.interface_name
            && name != &self.iface
        {
            return false;
        }

        match &self.kind {
            DeviceKind::Vlan { parent, vlan_id } => {
                if profile.vlan_id != Some(*vlan_id) {
                    return false;
                }
                if profile.parent.is_some() || profile.mac_address.is_some() {
                    let wanted = profile_parent(profile);
                    if wanted.is_none() || wanted != *parent {
                        return false;
                    }
                }
                true
            }
            DeviceKind::Infiniband { p_key, .. } => {
                if profile.p_key != *p_key {
                    return false;
                }
                self.mac_matches(profile)
            }
            _ => self.mac_matches(profile),
        }
    }

    fn mac_matches(&self, profile: &ConnectionProfile) -> bool {
        match (&profile.mac_address, &self.hw_address) {
            (None, _) => true,
            (Some(wanted), Some(hw)) => hw_addr_eq(wanted, hw),
            (Some(_), None) => false,
        }
    }

    /// Generates a profile describing what currently runs on the interface.
    ///
    /// Returns `None` for device types without generation support, for
    /// slaves whose master type is unknown, and for interfaces carrying no
    /// configuration worth assuming.
    pub(crate) fn generate_candidate(&self, ctx: &GenerationContext) -> Option<ConnectionProfile> {
        if !self.can_assume_connections() {
            return None;
        }
        let ctype = self.kind.connection_type()?;
        let cfg = &self.live_config;

        let mut profile = ProfileBuilder::new(ctype, format!("auto-{}", self.iface))
            .interface_name(self.iface.clone())
            .autoconnect(false)
            .generated()
            .build();

        if let Some(master) = &cfg.master {
            let Some(master_type) = ctx.master_type else {
                debug!(
                    "({}): cannot generate connection: master {master} is unknown",
                    self.iface
                );
                return None;
            };
            profile.master = Some(master.clone());
            profile.slave_type = Some(master_type);
            profile.ipv4 = Ipv4Settings {
                method: Ipv4Method::Disabled,
                addresses: Vec::new(),
            };
            profile.ipv6 = Ipv6Settings {
                method: Ipv6Method::Ignore,
                addresses: Vec::new(),
            };
            return Some(profile);
        }

        profile.ipv4 = if cfg.ipv4_addresses.is_empty() {
            Ipv4Settings {
                method: Ipv4Method::Disabled,
                addresses: Vec::new(),
            }
        } else if cfg.ipv4_dynamic {
            Ipv4Settings::default()
        } else {
            Ipv4Settings {
                method: Ipv4Method::Manual,
                addresses: cfg.ipv4_addresses.clone(),
            }
        };

        let global6: Vec<String> = cfg
            .ipv6_addresses
            .iter()
            .filter(|a| !is_ipv6_link_local(a))
            .cloned()
            .collect();
        profile.ipv6 = if cfg.ipv6_addresses.is_empty() {
            Ipv6Settings {
                method: Ipv6Method::Ignore,
                addresses: Vec::new(),
            }
        } else if global6.is_empty() {
            Ipv6Settings {
                method: Ipv6Method::LinkLocal,
                addresses: Vec::new(),
            }
        } else if cfg.ipv6_dynamic {
            Ipv6Settings::default()
        } else {
            Ipv6Settings {
                method: Ipv6Method::Manual,
                addresses: global6,
            }
        };

        if profile.ipv4.method == Ipv4Method::Disabled
            && matches!(profile.ipv6.method, Ipv6Method::Ignore | Ipv6Method::LinkLocal)
        {
            debug!("({}): no IP configuration found to assume", self.iface);
            return None;
        }

        match &self.kind {
            DeviceKind::Vlan { vlan_id, .. } => {
                profile.vlan_id = Some(*vlan_id);
                profile.parent = ctx.parent_iface.clone();
            }
            DeviceKind::Infiniband { p_key, .. } => {
                profile.p_key = *p_key;
                profile.parent = ctx.parent_iface.clone();
            }
            _ => {}
        }
        Some(profile)
    }

    /// Fills in what a partial profile leaves open for this device.
    pub(crate) fn complete_profile(
        &self,
        partial: PartialProfile,
        existing: &[ConnectionProfile],
    ) -> Result<ConnectionProfile, ManagerError> {
        let Some(hosted) = self.kind.connection_type() else {
            return Err(ManagerError::UnsupportedConnectionType(format!(
                "device {} cannot host connections",
                self.iface
            )));
        };
        let ctype = partial.connection_type.unwrap_or(hosted);
        if ctype != hosted {
            return Err(ManagerError::UnsupportedConnectionType(format!(
                "'{ctype}' connections are not compatible with device {}",
                self.iface
            )));
        }
        if let Some(name) = &partial.interface_name
            && name != &self.iface
        {
            return Err(ManagerError::UnsupportedConnectionType(format!(
                "interface name '{name}' does not match device {}",
                self.iface
            )));
        }

        let id = partial.id.unwrap_or_else(|| {
            unique_profile_name(&format!("{} connection", ctype.display_name()), existing)
        });
        let mut profile = ProfileBuilder::new(ctype, id)
            .permissions(partial.permissions)
            .build();
        if let Some(autoconnect) = partial.autoconnect {
            profile.autoconnect = autoconnect;
        }
        if let Some(ipv4) = partial.ipv4 {
            profile.ipv4 = ipv4;
        }
        if let Some(ipv6) = partial.ipv6 {
            profile.ipv6 = ipv6;
        }
        profile.interface_name = partial
            .interface_name
            .or_else(|| self.is_software().then(|| self.iface.clone()));
        match &self.kind {
            DeviceKind::Vlan { vlan_id, .. } => profile.vlan_id = Some(*vlan_id),
            DeviceKind::Infiniband { p_key, .. } => profile.p_key = *p_key,
            _ => {}
        }
        Ok(profile)
    }

    /// Snapshot for clients.
    pub(crate) fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            udi: self.udi.clone(),
            ifindex: self.ifindex,
            interface: self.iface.clone(),
            ip_interface: self.ip_interface().to_string(),
            link_type: self.kind.link_type(),
            driver: self.driver.clone(),
            hw_address: self.hw_address.clone(),
            state: self.state,
            managed: self.is_managed(),
            is_software: self.is_software(),
            nm_owned: self.nm_owned,
            active_connection: self.act_request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LinkConfig;

    fn eth(config: LinkConfig) -> Device {
        let link = PlatformLink::new(5, "eth0", LinkType::Ethernet)
            .with_udi("/sys/devices/pci0000:00/net/eth0")
            .with_hw_address("00:11:22:33:44:55")
            .with_carrier(true)
            .with_config(config);
        Device::from_link(&link, DeviceKind::Ethernet)
    }

    fn dhcp4() -> LinkConfig {
        LinkConfig {
            ipv4_addresses: vec!["192.168.1.20/24".into()],
            ipv4_dynamic: true,
            ..LinkConfig::default()
        }
    }

    #[test]
    fn generates_dhcp_candidate() {
        let dev = eth(dhcp4());
        let c = dev.generate_candidate(&GenerationContext::default()).unwrap();
        assert_eq!(c.id, "auto-eth0");
        assert_eq!(c.interface_name.as_deref(), Some("eth0"));
        assert_eq!(c.ipv4.method, Ipv4Method::Auto);
        assert_eq!(c.ipv6.method, Ipv6Method::Ignore);
        assert!(c.generated);
        assert!(!c.autoconnect);
    }

    #[test]
    fn candidates_never_share_a_uuid() {
        let dev = eth(dhcp4());
        let a = dev.generate_candidate(&GenerationContext::default()).unwrap();
        let b = dev.generate_candidate(&GenerationContext::default()).unwrap();
        assert_ne!(a.uuid, b.uuid);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn no_candidate_without_configuration() {
        let dev = eth(LinkConfig {
            ipv6_addresses: vec!["fe80::1/64".into()],
            ..LinkConfig::default()
        });
        assert!(dev.generate_candidate(&GenerationContext::default()).is_none());
    }

    #[test]
    fn slave_candidate_needs_master_type() {
        let cfg = LinkConfig {
            master: Some("bond0".into()),
            ..LinkConfig::default()
        };
        let dev = eth(cfg);
        assert!(dev.generate_candidate(&GenerationContext::default()).is_none());

        let ctx = GenerationContext {
            master_type: Some(ConnectionType::Bond),
            parent_iface: None,
        };
        let c = dev.generate_candidate(&ctx).unwrap();
        assert_eq!(c.master.as_deref(), Some("bond0"));
        assert_eq!(c.slave_type, Some(ConnectionType::Bond));
        assert_eq!(c.ipv4.method, Ipv4Method::Disabled);
    }

    #[test]
    fn wifi_cannot_generate() {
        let link = PlatformLink::new(3, "wlan0", LinkType::Wifi).with_config(dhcp4());
        let dev = Device::from_link(&link, DeviceKind::Wifi);
        assert!(dev.generate_candidate(&GenerationContext::default()).is_none());
    }

    #[test]
    fn compatibility_checks_type_name_and_mac() {
        let dev = eth(LinkConfig::default());
        let ok = ProfileBuilder::new(ConnectionType::Ethernet, "w").build();
        assert!(dev.check_compatible(&ok, |_| None));

        let wrong_type = ProfileBuilder::new(ConnectionType::Wifi, "w").build();
        assert!(!dev.check_compatible(&wrong_type, |_| None));

        let wrong_name = ProfileBuilder::new(ConnectionType::Ethernet, "w")
            .interface_name("eth1")
            .build();
        assert!(!dev.check_compatible(&wrong_name, |_| None));

        let mac = ProfileBuilder::new(ConnectionType::Ethernet, "w")
            .mac_address("00:11:22:33:44:55")
            .build();
        assert!(dev.check_compatible(&mac, |_| None));
        let other_mac = ProfileBuilder::new(ConnectionType::Ethernet, "w")
            .mac_address("00:11:22:33:44:56")
            .build();
        assert!(!dev.check_compatible(&other_mac, |_| None));
    }

    #[test]
    fn vlan_compatibility_follows_parent_and_id() {
        let parent = DeviceId(1);
        let dev = Device::unrealized(
            "eth0.10",
            DeviceKind::Vlan {
                parent: Some(parent),
                vlan_id: 10,
            },
        );
        let profile = ProfileBuilder::new(ConnectionType::Vlan, "v").vlan("eth0", 10).build();
        assert!(dev.check_compatible(&profile, |_| Some(parent)));
        assert!(!dev.check_compatible(&profile, |_| Some(DeviceId(2))));
        assert!(!dev.check_compatible(&profile, |_| None));

        let other_id = ProfileBuilder::new(ConnectionType::Vlan, "v").vlan("eth0", 11).build();
        assert!(!dev.check_compatible(&other_id, |_| Some(parent)));
    }

    #[test]
    fn availability_rules() {
        let mut dev = eth(LinkConfig::default());
        assert!(dev.is_available(false));
        dev.carrier = false;
        assert!(!dev.is_available(false));
        assert!(dev.is_available(true));
        dev.firmware_missing = true;
        assert!(!dev.is_available(true));

        let mut bond = Device::unrealized("bond0", DeviceKind::Bond);
        assert!(bond.is_software());
        assert!(bond.is_available(false));
        bond.radio_enabled = false;
        assert!(bond.is_available(false));

        let mut wifi = Device::unrealized("wlan0", DeviceKind::Wifi);
        wifi.radio_enabled = false;
        assert!(!wifi.is_available(true));
    }

    #[test]
    fn completes_partial_profiles() {
        let dev = eth(LinkConfig::default());
        let existing = vec![ConnectionProfile::new("Wired connection 1", ConnectionType::Ethernet)];
        let p = dev.complete_profile(PartialProfile::new(), &existing).unwrap();
        assert_eq!(p.id, "Wired connection 2");
        assert_eq!(p.connection_type, ConnectionType::Ethernet);
        assert_eq!(p.interface_name, None);

        let bond = Device::unrealized("bond0", DeviceKind::Bond);
        let p = bond.complete_profile(PartialProfile::new(), &[]).unwrap();
        assert_eq!(p.interface_name.as_deref(), Some("bond0"));

        let wrong = PartialProfile {
            connection_type: Some(ConnectionType::Wifi),
            ..PartialProfile::default()
        };
        assert!(matches!(
            dev.complete_profile(wrong, &[]),
            Err(ManagerError::UnsupportedConnectionType(_))
        ));
    }

    #[test]
    fn pending_actions_are_sets() {
        let mut dev = eth(LinkConfig::default());
        assert!(dev.add_pending_action("dhcp4"));
        assert!(!dev.add_pending_action("dhcp4"));
        assert!(dev.remove_pending_action("dhcp4"));
        assert!(!dev.remove_pending_action("dhcp4"));
    }
}
