//! Constants shared by the device and activation code.
//!
//! Numeric codes follow the values NetworkManager exports for device types,
//! so clients written against it can interpret what this daemon reports.

/// Device type codes.
pub mod device_type {
    pub const ETHERNET: u32 = 1;
    pub const WIFI: u32 = 2;
    pub const BLUETOOTH: u32 = 5;
    pub const OLPC_MESH: u32 = 6;
    pub const WIMAX: u32 = 7;
    pub const MODEM: u32 = 8;
    pub const INFINIBAND: u32 = 9;
    pub const BOND: u32 = 10;
    pub const VLAN: u32 = 11;
    pub const BRIDGE: u32 = 13;
    pub const GENERIC: u32 = 14;
    pub const TEAM: u32 = 15;
    pub const TUN: u32 = 16;
    pub const IP_TUNNEL: u32 = 17;
    pub const MACVLAN: u32 = 18;
    pub const VXLAN: u32 = 19;
    pub const VETH: u32 = 20;
}

/// Interface naming rules.
pub mod ifname {
    /// Longest interface name the kernel accepts (IFNAMSIZ - 1).
    pub const MAX_LEN: usize = 15;

    /// Prefixes of links that are never turned into devices.
    ///
    /// `bnep` links belong to Bluetooth PAN connections and are driven
    /// through the Bluetooth device instead.
    pub const IGNORED_PREFIXES: &[&str] = &["bnep"];
}

/// Object identity prefixes.
pub mod udi {
    /// Prefix of identifiers given to devices without a sysfs path.
    pub const VIRTUAL_PREFIX: &str = "/virtual/device/";
}

/// Limits applied while resolving dependencies.
pub mod limits {
    /// Longest master chain followed before giving up.
    pub const MAX_MASTER_DEPTH: usize = 8;
}

/// Timer intervals for the manager loop.
pub mod timeouts {
    use std::time::Duration;

    /// Interval between periodic internet connectivity checks (5 minutes).
    const CONNECTIVITY_INTERVAL_SECS: u64 = 300;

    /// Interval between firmware re-probes of devices missing firmware.
    const FIRMWARE_REPROBE_SECS: u64 = 30;

    /// Returns the default connectivity check interval.
    pub fn connectivity_interval() -> Duration {
        Duration::from_secs(CONNECTIVITY_INTERVAL_SECS)
    }

    /// Returns the default firmware re-probe interval.
    pub fn firmware_reprobe() -> Duration {
        Duration::from_secs(FIRMWARE_REPROBE_SECS)
    }
}
