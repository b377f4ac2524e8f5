//! Connection assumption.
//!
//! Compares the profile a device generated from its live configuration with
//! the stored profiles and picks the one that describes the same thing. The
//! comparison is structural and depends on carrier: an automatic IPv4
//! profile on a link without carrier cannot have produced an address yet, so
//! a candidate with IPv4 disabled still matches it.

use crate::api::profile::{ConnectionProfile, Ipv4Method, Ipv6Method, is_uuid};
use crate::util::utils::hw_addr_eq;

/// Orders profiles most recently used first, keeping storage order on ties.
pub(crate) fn sort_by_last_used(profiles: &mut [ConnectionProfile]) {
    profiles.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Returns the first profile in `activatable` that the device accepts and
/// that is structurally equivalent to `candidate`.
///
/// `activatable` must already be in preference order.
pub(crate) fn find_matching<'a>(
    candidate: &ConnectionProfile,
    activatable: &'a [ConnectionProfile],
    carrier: bool,
    mut compatible: impl FnMut(&ConnectionProfile) -> bool,
) -> Option<&'a ConnectionProfile> {
    activatable
        .iter()
        .find(|p| compatible(p) && equivalent(candidate, p, carrier))
}

fn equivalent(candidate: &ConnectionProfile, profile: &ConnectionProfile, carrier: bool) -> bool {
    if candidate.connection_type != profile.connection_type {
        return false;
    }
    if let (Some(want), Some(have)) = (&profile.interface_name, &candidate.interface_name)
        && want != have
    {
        return false;
    }
    if let (Some(want), Some(have)) = (&profile.mac_address, &candidate.mac_address)
        && !hw_addr_eq(want, have)
    {
        return false;
    }
    if candidate.vlan_id.is_some() && candidate.vlan_id != profile.vlan_id {
        return false;
    }
    if !masters_match(candidate, profile) {
        return false;
    }
    if candidate.is_slave() {
        return true;
    }
    ipv4_matches(candidate, profile, carrier) && ipv6_matches(candidate, profile)
}

fn masters_match(candidate: &ConnectionProfile, profile: &ConnectionProfile) -> bool {
    if candidate.slave_type != profile.slave_type {
        return false;
    }
    match (&candidate.master, &profile.master) {
        (None, None) => true,
        (Some(have), Some(want)) => have == want || is_uuid(want),
        _ => false,
    }
}

fn ipv4_matches(candidate: &ConnectionProfile, profile: &ConnectionProfile, carrier: bool) -> bool {
    match (profile.ipv4.method, candidate.ipv4.method) {
        (Ipv4Method::Auto, Ipv4Method::Auto) => carrier,
        (Ipv4Method::Auto, Ipv4Method::Disabled) => !carrier,
        (Ipv4Method::Manual, Ipv4Method::Manual) => {
            same_addresses(&profile.ipv4.addresses, &candidate.ipv4.addresses)
        }
        (want, have) => want == have,
    }
}

fn ipv6_matches(candidate: &ConnectionProfile, profile: &ConnectionProfile) -> bool {
    match (profile.ipv6.method, candidate.ipv6.method) {
        (Ipv6Method::Auto | Ipv6Method::Dhcp, Ipv6Method::LinkLocal) => true,
        (Ipv6Method::Manual, Ipv6Method::Manual) => {
            same_addresses(&profile.ipv6.addresses, &candidate.ipv6.addresses)
        }
        (want, have) => want == have,
    }
}

fn same_addresses(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = b.iter().map(String::as_str).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}
