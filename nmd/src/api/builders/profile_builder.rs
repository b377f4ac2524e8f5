//! Builder for connection profiles.
//!
//! `ProfileBuilder` fills in the common sections (identity, autoconnect,
//! IPv4/IPv6) and exposes the dependency fields (master, VLAN parent) that
//! the core resolves before activation.
//!
//! # Example
//!
//! ```rust
//! use nmd::builders::ProfileBuilder;
//! use nmd::ConnectionType;
//!
//! let slave = ProfileBuilder::new(ConnectionType::Ethernet, "bond0-slave")
//!     .interface_name("eth1")
//!     .master("bond0", ConnectionType::Bond)
//!     .ipv4_disabled()
//!     .ipv6_ignore()
//!     .build();
//!
//! assert!(slave.is_slave());
//! ```

use uuid::Uuid;

use crate::api::profile::{ConnectionProfile, ConnectionType, Ipv4Method, Ipv6Method};

/// Connection profile builder.
pub struct ProfileBuilder {
    profile: ConnectionProfile,
}

impl ProfileBuilder {
    /// Creates a new builder with the given type and human-readable id.
    ///
    /// A random UUID is assigned; override it with [`uuid`](Self::uuid).
    pub fn new(connection_type: ConnectionType, id: impl Into<String>) -> Self {
        Self {
            profile: ConnectionProfile::new(id, connection_type),
        }
    }

    /// Sets a specific UUID for the profile.
    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.profile.uuid = uuid.to_string();
        self
    }

    /// Restricts the profile to an interface name.
    ///
    /// For bonds, bridges, teams and VLANs this is also the name of the
    /// interface created on activation.
    pub fn interface_name(mut self, name: impl Into<String>) -> Self {
        self.profile.interface_name = Some(name.into());
        self
    }

    /// Restricts the profile to a hardware address.
    pub fn mac_address(mut self, mac: impl Into<String>) -> Self {
        self.profile.mac_address = Some(mac.into());
        self
    }

    /// Enables or disables automatic activation.
    pub fn autoconnect(mut self, enabled: bool) -> Self {
        self.profile.autoconnect = enabled;
        self
    }

    /// Makes the profile a slave of `master` (interface name or profile UUID).
    pub fn master(mut self, master: impl Into<String>, slave_type: ConnectionType) -> Self {
        self.profile.master = Some(master.into());
        self.profile.slave_type = Some(slave_type);
        self
    }

    /// Configures a VLAN on `parent` (interface name, profile UUID or MAC).
    pub fn vlan(mut self, parent: impl Into<String>, id: u16) -> Self {
        self.profile.parent = Some(parent.into());
        self.profile.vlan_id = Some(id);
        self
    }

    /// Configures an InfiniBand partition on `parent`.
    pub fn infiniband_partition(mut self, parent: impl Into<String>, p_key: u16) -> Self {
        self.profile.parent = Some(parent.into());
        self.profile.p_key = Some(p_key);
        self
    }

    /// Limits visibility to the given users.
    pub fn permissions<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profile.permissions = users.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the last-used timestamp.
    pub fn timestamp(mut self, secs: u64) -> Self {
        self.profile.timestamp = secs;
        self
    }

    /// Configures IPv4 to use DHCP.
    pub fn ipv4_auto(mut self) -> Self {
        self.profile.ipv4.method = Ipv4Method::Auto;
        self.profile.ipv4.addresses.clear();
        self
    }

    /// Configures IPv4 with static `address/prefix` entries.
    pub fn ipv4_manual<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profile.ipv4.method = Ipv4Method::Manual;
        self.profile.ipv4.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Configures IPv4 link-local addressing.
    pub fn ipv4_link_local(mut self) -> Self {
        self.profile.ipv4.method = Ipv4Method::LinkLocal;
        self
    }

    /// Disables IPv4 for this profile.
    pub fn ipv4_disabled(mut self) -> Self {
        self.profile.ipv4.method = Ipv4Method::Disabled;
        self.profile.ipv4.addresses.clear();
        self
    }

    /// Configures IPv6 to use SLAAC/DHCPv6.
    pub fn ipv6_auto(mut self) -> Self {
        self.profile.ipv6.method = Ipv6Method::Auto;
        self
    }

    /// Configures IPv6 with static `address/prefix` entries.
    pub fn ipv6_manual<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profile.ipv6.method = Ipv6Method::Manual;
        self.profile.ipv6.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Configures IPv6 link-local addressing only.
    pub fn ipv6_link_local(mut self) -> Self {
        self.profile.ipv6.method = Ipv6Method::LinkLocal;
        self
    }

    /// Disables IPv6 for this profile.
    pub fn ipv6_ignore(mut self) -> Self {
        self.profile.ipv6.method = Ipv6Method::Ignore;
        self.profile.ipv6.addresses.clear();
        self
    }

    /// Marks the profile as synthesized by the daemon.
    pub(crate) fn generated(mut self) -> Self {
        self.profile.generated = true;
        self
    }

    /// Builds the final profile.
    pub fn build(self) -> ConnectionProfile {
        self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_basic_profile() {
        let p = ProfileBuilder::new(ConnectionType::Ethernet, "Wired").build();
        assert_eq!(p.id, "Wired");
        assert_eq!(p.connection_type, ConnectionType::Ethernet);
        assert!(Uuid::parse_str(&p.uuid).is_ok());
        assert!(p.autoconnect);
    }

    #[test]
    fn sets_custom_uuid() {
        let id = Uuid::new_v4();
        let p = ProfileBuilder::new(ConnectionType::Bond, "bond0").uuid(id).build();
        assert_eq!(p.uuid, id.to_string());
    }

    #[test]
    fn configures_master() {
        let p = ProfileBuilder::new(ConnectionType::Ethernet, "slave")
            .master("bond0", ConnectionType::Bond)
            .build();
        assert_eq!(p.master.as_deref(), Some("bond0"));
        assert_eq!(p.slave_type, Some(ConnectionType::Bond));
    }

    #[test]
    fn configures_vlan() {
        let p = ProfileBuilder::new(ConnectionType::Vlan, "vlan10")
            .vlan("eth0", 10)
            .build();
        assert_eq!(p.parent.as_deref(), Some("eth0"));
        assert_eq!(p.vlan_id, Some(10));
        assert!(p.needs_virtual_device());
    }

    #[test]
    fn manual_then_auto_clears_addresses() {
        let p = ProfileBuilder::new(ConnectionType::Ethernet, "e")
            .ipv4_manual(["192.168.1.10/24"])
            .ipv4_auto()
            .build();
        assert_eq!(p.ipv4.method, Ipv4Method::Auto);
        assert!(p.ipv4.addresses.is_empty());
    }

    #[test]
    fn permissions_restrict_visibility() {
        let p = ProfileBuilder::new(ConnectionType::Wifi, "home")
            .permissions(["alice"])
            .build();
        assert!(p.is_private());
        assert!(!p.is_visible_to(Some("mallory")));
    }
}
