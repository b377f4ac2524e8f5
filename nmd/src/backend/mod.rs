//! Collaborators the manager core talks to.
//!
//! The core never touches the kernel, disk or the policy service directly.
//! It goes through these traits, so the daemon can plug in sysfs and file
//! backed implementations while tests use the in-memory ones in
//! [`memory`], [`auth`] and [`connectivity`].

pub mod auth;
pub mod connectivity;
pub mod memory;

use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::api::models::{AuthResult, ConnectivityState, Permission, RfkillState, RfkillType, Subject};
use crate::api::profile::ConnectionProfile;

/// Kernel link classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkType {
    #[default]
    Unknown,
    Loopback,
    Ethernet,
    Veth,
    Infiniband,
    Wifi,
    OlpcMesh,
    Wimax,
    /// Ethernet-framed link belonging to a mobile broadband modem.
    WwanEthernet,
    Bond,
    Bridge,
    Team,
    Vlan,
    Tun,
    Macvlan,
    Vxlan,
    Gre,
}

impl LinkType {
    /// Parses the kind names used by `ip link` and sysfs.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "loopback" => Self::Loopback,
            "ether" | "ethernet" => Self::Ethernet,
            "veth" => Self::Veth,
            "infiniband" => Self::Infiniband,
            "wlan" | "wifi" => Self::Wifi,
            "olpc-mesh" => Self::OlpcMesh,
            "wimax" => Self::Wimax,
            "wwan" => Self::WwanEthernet,
            "bond" => Self::Bond,
            "bridge" => Self::Bridge,
            "team" => Self::Team,
            "vlan" => Self::Vlan,
            "tun" | "tap" => Self::Tun,
            "macvlan" | "macvtap" => Self::Macvlan,
            "vxlan" => Self::Vxlan,
            "gre" | "gretap" => Self::Gre,
            _ => Self::Unknown,
        }
    }
}

impl Display for LinkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Loopback => "loopback",
            Self::Ethernet => "ethernet",
            Self::Veth => "veth",
            Self::Infiniband => "infiniband",
            Self::Wifi => "wifi",
            Self::OlpcMesh => "olpc-mesh",
            Self::Wimax => "wimax",
            Self::WwanEthernet => "wwan",
            Self::Bond => "bond",
            Self::Bridge => "bridge",
            Self::Team => "team",
            Self::Vlan => "vlan",
            Self::Tun => "tun",
            Self::Macvlan => "macvlan",
            Self::Vxlan => "vxlan",
            Self::Gre => "gre",
        };
        write!(f, "{name}")
    }
}

/// IP configuration currently present on a link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkConfig {
    /// IPv4 addresses in `address/prefix` form.
    pub ipv4_addresses: Vec<String>,
    /// Whether the IPv4 addresses came from DHCP.
    pub ipv4_dynamic: bool,
    /// IPv6 addresses in `address/prefix` form.
    pub ipv6_addresses: Vec<String>,
    /// Whether the IPv6 addresses were autoconfigured.
    pub ipv6_dynamic: bool,
    /// Interface name of the master this link is enslaved to.
    pub master: Option<String>,
    /// Whether the link carries the IPv4 default route.
    pub default4: bool,
    /// Whether the link carries the IPv6 default route.
    pub default6: bool,
}

impl LinkConfig {
    /// Returns `true` if nothing is configured on the link.
    pub fn is_empty(&self) -> bool {
        self.ipv4_addresses.is_empty() && self.ipv6_addresses.is_empty() && self.master.is_none()
    }
}

/// A kernel network link as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformLink {
    pub ifindex: i32,
    pub name: String,
    pub link_type: LinkType,
    /// Stable identifier, usually the sysfs path.
    pub udi: Option<String>,
    pub driver: Option<String>,
    pub hw_address: Option<String>,
    pub carrier: bool,
    /// Lower link for VLANs, macvlans and partitions.
    pub parent_ifindex: Option<i32>,
    pub vlan_id: Option<u16>,
    pub p_key: Option<u16>,
    pub config: LinkConfig,
    pub firmware_missing: bool,
}

impl PlatformLink {
    /// Creates a link with the given index, name and type and no other facts.
    pub fn new(ifindex: i32, name: impl Into<String>, link_type: LinkType) -> Self {
        Self {
            ifindex,
            name: name.into(),
            link_type,
            udi: None,
            driver: None,
            hw_address: None,
            carrier: false,
            parent_ifindex: None,
            vlan_id: None,
            p_key: None,
            config: LinkConfig::default(),
            firmware_missing: false,
        }
    }

    pub fn with_udi(mut self, udi: impl Into<String>) -> Self {
        self.udi = Some(udi.into());
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn with_hw_address(mut self, hw: impl Into<String>) -> Self {
        self.hw_address = Some(hw.into());
        self
    }

    pub fn with_carrier(mut self, carrier: bool) -> Self {
        self.carrier = carrier;
        self
    }

    pub fn with_parent(mut self, parent_ifindex: i32) -> Self {
        self.parent_ifindex = Some(parent_ifindex);
        self
    }

    pub fn with_vlan_id(mut self, vlan_id: u16) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    pub fn with_config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_firmware_missing(mut self, missing: bool) -> Self {
        self.firmware_missing = missing;
        self
    }
}

/// Link change reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    LinkAdded(PlatformLink),
    LinkChanged(PlatformLink),
    LinkRemoved { ifindex: i32 },
}

/// Profile change reported by the connection store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    Added(String),
    Updated(String),
    Removed(String),
}

/// Host notifications fed to the manager's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerInput {
    Platform(PlatformEvent),
    Settings(SettingsEvent),
    /// A kill switch changed; the rfkill source should be read again.
    RfkillChanged,
    /// New firmware was installed.
    FirmwareChanged,
}

/// Parameters of a software link the manager asks the platform to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareLinkRequest {
    pub name: String,
    pub link_type: LinkType,
    pub parent_ifindex: Option<i32>,
    pub vlan_id: Option<u16>,
    pub p_key: Option<u16>,
}

/// Connection store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("a connection with UUID {0} already exists")]
    Duplicate(String),
    #[error("failed to persist connection: {0}")]
    Io(String),
    #[error("invalid connection: {0}")]
    Invalid(String),
}

/// Platform failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("link {0} already exists")]
    Exists(String),
    #[error("link {0} not found")]
    NotFound(String),
    #[error("platform operation failed: {0}")]
    Failed(String),
}

/// Authorization backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization service unavailable: {0}")]
    Unavailable(String),
    #[error("authorization request cancelled")]
    Cancelled,
}

/// Persistent store of connection profiles.
pub trait ConnectionStore: Send {
    /// Every known profile, in storage order.
    fn connections(&self) -> Vec<ConnectionProfile>;

    /// Looks up a profile by UUID.
    fn connection_by_uuid(&self, uuid: &str) -> Option<ConnectionProfile> {
        self.connections().into_iter().find(|c| c.uuid == uuid)
    }

    /// Persists a new profile.
    fn add_connection(&mut self, profile: ConnectionProfile) -> Result<(), StoreError>;

    /// Records the last activation time of a profile.
    fn set_timestamp(&mut self, uuid: &str, secs: u64) -> Result<(), StoreError>;
}

/// Kernel link management.
pub trait Platform: Send {
    /// Every link currently present.
    fn links(&self) -> Vec<PlatformLink>;

    /// Looks up a link by index.
    fn link(&self, ifindex: i32) -> Option<PlatformLink> {
        self.links().into_iter().find(|l| l.ifindex == ifindex)
    }

    /// Creates a software link.
    ///
    /// The new link is reported later through `PlatformEvent::LinkAdded`,
    /// which is when the device registered for it learns its ifindex.
    fn create_software_link(&mut self, request: &SoftwareLinkRequest) -> Result<(), PlatformError>;

    /// Deletes a link.
    fn delete_link(&mut self, ifindex: i32) -> Result<(), PlatformError>;

    /// Sets a link administratively down.
    fn set_link_down(&mut self, ifindex: i32) -> Result<(), PlatformError>;

    /// Whether the link is armed to wake the host.
    fn wake_on_lan(&self, _ifindex: i32) -> bool {
        false
    }
}

/// Policy decisions for user requests.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decides whether `subject` holds `permission`.
    async fn authorize(&self, subject: &Subject, permission: Permission) -> Result<AuthResult, AuthError>;
}

/// Internet reachability probe.
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    async fn check(&self) -> ConnectivityState;
}

/// Radio kill switch state.
pub trait RfkillSource: Send {
    /// State of the switch for a radio class, or `None` if no switch exists.
    fn state(&self, rtype: RfkillType) -> Option<RfkillState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_kinds_parse() {
        assert_eq!(LinkType::from_kind("bond"), LinkType::Bond);
        assert_eq!(LinkType::from_kind("tap"), LinkType::Tun);
        assert_eq!(LinkType::from_kind("ether"), LinkType::Ethernet);
        assert_eq!(LinkType::from_kind("???"), LinkType::Unknown);
        assert_eq!(LinkType::Vlan.to_string(), "vlan");
    }

    #[test]
    fn link_builder_sets_fields() {
        let link = PlatformLink::new(5, "eth0.10", LinkType::Vlan)
            .with_parent(2)
            .with_vlan_id(10)
            .with_carrier(true);
        assert_eq!(link.parent_ifindex, Some(2));
        assert_eq!(link.vlan_id, Some(10));
        assert!(link.carrier);
        assert!(link.config.is_empty());
    }
}
