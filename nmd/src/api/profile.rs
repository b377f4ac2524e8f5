//! Connection profiles as seen by the core.
//!
//! Profiles are owned by the connection store; the core only reads them,
//! asks the store to persist new ones, and compares them against what a
//! device is currently running.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Profile type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "802-3-ethernet")]
    Ethernet,
    #[serde(rename = "802-11-wireless")]
    Wifi,
    #[serde(rename = "bond")]
    Bond,
    #[serde(rename = "bridge")]
    Bridge,
    #[serde(rename = "team")]
    Team,
    #[serde(rename = "vlan")]
    Vlan,
    #[serde(rename = "infiniband")]
    Infiniband,
    #[serde(rename = "vpn")]
    Vpn,
    #[serde(rename = "generic")]
    Generic,
    #[serde(rename = "gsm")]
    Gsm,
    #[serde(rename = "bluetooth")]
    Bluetooth,
}

impl ConnectionType {
    /// Returns the type name used in stored profiles.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethernet => "802-3-ethernet",
            Self::Wifi => "802-11-wireless",
            Self::Bond => "bond",
            Self::Bridge => "bridge",
            Self::Team => "team",
            Self::Vlan => "vlan",
            Self::Infiniband => "infiniband",
            Self::Vpn => "vpn",
            Self::Generic => "generic",
            Self::Gsm => "gsm",
            Self::Bluetooth => "bluetooth",
        }
    }

    /// Parses a stored type name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "802-3-ethernet" | "ethernet" => Self::Ethernet,
            "802-11-wireless" | "wifi" => Self::Wifi,
            "bond" => Self::Bond,
            "bridge" => Self::Bridge,
            "team" => Self::Team,
            "vlan" => Self::Vlan,
            "infiniband" => Self::Infiniband,
            "vpn" => Self::Vpn,
            "generic" => Self::Generic,
            "gsm" => Self::Gsm,
            "bluetooth" => Self::Bluetooth,
            _ => return None,
        })
    }

    /// Returns `true` for types that can enslave other connections.
    pub fn is_master_type(&self) -> bool {
        matches!(self, Self::Bond | Self::Bridge | Self::Team)
    }

    /// Human readable name used when completing partial profiles.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ethernet => "Wired",
            Self::Wifi => "Wi-Fi",
            Self::Bond => "Bond",
            Self::Bridge => "Bridge",
            Self::Team => "Team",
            Self::Vlan => "VLAN",
            Self::Infiniband => "InfiniBand",
            Self::Vpn => "VPN",
            Self::Generic => "Generic",
            Self::Gsm => "Mobile broadband",
            Self::Bluetooth => "Bluetooth",
        }
    }
}

impl Display for ConnectionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// IPv4 configuration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ipv4Method {
    #[default]
    Auto,
    Manual,
    LinkLocal,
    Shared,
    Disabled,
}

/// IPv6 configuration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ipv6Method {
    #[default]
    Auto,
    Dhcp,
    Manual,
    LinkLocal,
    Shared,
    Ignore,
}

/// IPv4 section of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ipv4Settings {
    #[serde(default)]
    pub method: Ipv4Method,
    /// Addresses in `address/prefix` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// IPv6 section of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ipv6Settings {
    #[serde(default)]
    pub method: Ipv6Method,
    /// Addresses in `address/prefix` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// A persisted connection profile.
///
/// `master` may name an interface, a profile UUID, or (for VLAN parents)
/// a hardware address; the dependency resolver decides which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectionProfile {
    pub uuid: String,
    pub id: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default = "default_true")]
    pub autoconnect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slave_type: Option<ConnectionType>,
    /// VLAN or InfiniBand parent: interface name, profile UUID or MAC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_key: Option<u16>,
    /// Users allowed to see and activate the profile; empty means everyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    /// Last time the profile was activated, seconds since the epoch.
    #[serde(default)]
    pub timestamp: u64,
    /// Synthesized by the daemon from a running interface.
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub ipv4: Ipv4Settings,
    #[serde(default)]
    pub ipv6: Ipv6Settings,
}

impl ConnectionProfile {
    /// Creates a profile with a fresh random UUID and default settings.
    pub fn new(id: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            id: id.into(),
            connection_type,
            interface_name: None,
            mac_address: None,
            autoconnect: true,
            master: None,
            slave_type: None,
            parent: None,
            vlan_id: None,
            p_key: None,
            permissions: Vec::new(),
            timestamp: 0,
            generated: false,
            ipv4: Ipv4Settings::default(),
            ipv6: Ipv6Settings::default(),
        }
    }

    /// Returns `true` if the profile names a master.
    pub fn is_slave(&self) -> bool {
        self.master.is_some()
    }

    /// Returns `true` for VPN profiles.
    pub fn is_vpn(&self) -> bool {
        self.connection_type == ConnectionType::Vpn
    }

    /// Returns `true` if activating the profile creates a software interface.
    pub fn needs_virtual_device(&self) -> bool {
        match self.connection_type {
            ConnectionType::Bond
            | ConnectionType::Bridge
            | ConnectionType::Team
            | ConnectionType::Vlan => true,
            ConnectionType::Infiniband => self.p_key.is_some(),
            _ => false,
        }
    }

    /// Returns `true` if the profile may only be used by listed users.
    pub fn is_private(&self) -> bool {
        !self.permissions.is_empty()
    }

    /// Returns `true` if `user` may see the profile. Internal requests
    /// (`None`) see everything.
    pub fn is_visible_to(&self, user: Option<&str>) -> bool {
        match user {
            None => true,
            Some(name) => self.permissions.is_empty() || self.permissions.iter().any(|p| p == name),
        }
    }

    /// Returns `true` if `slave` may be enslaved to a connection of this profile.
    pub fn accepts_slave(&self, slave: &ConnectionProfile) -> bool {
        slave.slave_type == Some(self.connection_type)
    }
}

impl Display for ConnectionProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' ({})", self.id, self.uuid)
    }
}

/// A profile with only some fields filled in, as passed to
/// `add_and_activate_connection`.
///
/// The target device completes the rest: type, a unique name, a UUID and
/// the interface binding for software devices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialProfile {
    pub id: Option<String>,
    pub connection_type: Option<ConnectionType>,
    pub interface_name: Option<String>,
    pub autoconnect: Option<bool>,
    pub permissions: Vec<String>,
    pub ipv4: Option<Ipv4Settings>,
    pub ipv6: Option<Ipv6Settings>,
}

impl PartialProfile {
    /// A partial profile with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A partial VPN profile named `id`.
    pub fn vpn(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            connection_type: Some(ConnectionType::Vpn),
            ..Self::default()
        }
    }
}

/// Picks `"<base> N"` with the smallest N not used by `existing`.
pub(crate) fn unique_profile_name(base: &str, existing: &[ConnectionProfile]) -> String {
    (1..)
        .map(|n| format!("{base} {n}"))
        .find(|candidate| !existing.iter().any(|c| &c.id == candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Returns `true` if `value` parses as a UUID.
pub(crate) fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}
