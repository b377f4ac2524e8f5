//! Naming and matching helpers.
//!
//! Provides interface name derivation for virtual devices, hardware address
//! comparison and the unmanaged-device spec matcher.

use crate::types::constants::ifname;

/// Truncates an interface name to the kernel limit, on a char boundary.
pub(crate) fn truncate_ifname(name: &str) -> String {
    if name.len() <= ifname::MAX_LEN {
        return name.to_string();
    }
    let mut end = ifname::MAX_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Derives the interface name of a VLAN from its parent and id.
///
/// `eth0` with id 10 becomes `eth0.10`. When the result would exceed the
/// kernel limit the parent part is shortened so the id survives.
pub(crate) fn vlan_iface_name(parent: &str, vlan_id: u16) -> String {
    let suffix = format!(".{vlan_id}");
    let keep = ifname::MAX_LEN.saturating_sub(suffix.len());
    let mut end = parent.len().min(keep);
    while !parent.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{suffix}", &parent[..end])
}

/// Derives the interface name of an InfiniBand partition.
pub(crate) fn infiniband_iface_name(parent: &str, p_key: u16) -> String {
    truncate_ifname(&format!("{parent}.{p_key:04x}"))
}

/// Compares two hardware addresses ignoring case and separators.
pub(crate) fn hw_addr_eq(a: &str, b: &str) -> bool {
    let norm = |s: &str| -> String {
        s.chars()
            .filter(|c| *c != ':' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect()
    };
    !a.is_empty() && norm(a) == norm(b)
}

/// Returns `true` if an `address/prefix` string is an IPv6 link-local address.
pub(crate) fn is_ipv6_link_local(address: &str) -> bool {
    let host = address.split('/').next().unwrap_or_default();
    host.parse::<std::net::Ipv6Addr>()
        .map(|a| (a.segments()[0] & 0xffc0) == 0xfe80)
        .unwrap_or(false)
}

/// Matches a device against one unmanaged spec.
///
/// Supported forms are `mac:<address>` and `interface-name:<name>`, where the
/// name may end in `*` to match a prefix.
pub(crate) fn device_spec_matches(spec: &str, iface: &str, hw_address: Option<&str>) -> bool {
    if let Some(mac) = spec.strip_prefix("mac:") {
        return hw_address.is_some_and(|hw| hw_addr_eq(mac, hw));
    }
    if let Some(pattern) = spec.strip_prefix("interface-name:") {
        return match pattern.strip_suffix('*') {
            Some(prefix) => iface.starts_with(prefix),
            None => iface == pattern,
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlan_names() {
        assert_eq!(vlan_iface_name("eth0", 10), "eth0.10");
        let name = vlan_iface_name("enp0s31f6verylong", 4094);
        assert_eq!(name, "enp0s31f6v.4094");
        assert!(name.len() <= ifname::MAX_LEN);
    }

    #[test]
    fn infiniband_names() {
        assert_eq!(infiniband_iface_name("ib0", 0x8001), "ib0.8001");
        assert_eq!(infiniband_iface_name("ib0", 0x12), "ib0.0012");
    }

    #[test]
    fn truncation_keeps_short_names() {
        assert_eq!(truncate_ifname("bond0"), "bond0");
        assert_eq!(truncate_ifname("abcdefghijklmnopq"), "abcdefghijklmno");
    }

    #[test]
    fn hw_addresses_compare_loosely() {
        assert!(hw_addr_eq("00:11:22:AA:BB:CC", "00-11-22-aa-bb-cc"));
        assert!(!hw_addr_eq("00:11:22:AA:BB:CC", "00:11:22:AA:BB:CD"));
        assert!(!hw_addr_eq("", ""));
    }

    #[test]
    fn link_local_detection() {
        assert!(is_ipv6_link_local("fe80::1/64"));
        assert!(!is_ipv6_link_local("2001:db8::1/64"));
        assert!(!is_ipv6_link_local("garbage"));
    }

    #[test]
    fn unmanaged_specs() {
        assert!(device_spec_matches("interface-name:eth0", "eth0", None));
        assert!(!device_spec_matches("interface-name:eth0", "eth1", None));
        assert!(device_spec_matches("interface-name:veth*", "veth12", None));
        assert!(device_spec_matches("mac:00:11:22:33:44:55", "x", Some("00:11:22:33:44:55")));
        assert!(!device_spec_matches("mac:00:11:22:33:44:55", "x", None));
        assert!(!device_spec_matches("driver:e1000", "eth0", None));
    }
}
