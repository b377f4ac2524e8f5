//! Device type registry.
//!
//! Centralizes the per-type facts the core needs: the profile type a device
//! can host, whether it is a software interface, whether it waits for a
//! carrier, and which radio kill switch governs it. Adding a device type
//! means adding one implementation here instead of touching every match.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::api::models::RfkillType;
use crate::api::profile::ConnectionType;
use crate::types::constants::device_type;

/// Trait describing a device type's capabilities.
pub trait DeviceTypeInfo: Send + Sync {
    /// The type code exported for devices of this type.
    fn type_code(&self) -> u32;

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    /// Profile type this device can host, if any.
    fn connection_type(&self) -> Option<ConnectionType>;

    /// Whether devices of this type are software interfaces.
    fn is_software(&self) -> bool {
        false
    }

    /// Whether the device must see a carrier before it is available.
    fn requires_carrier(&self) -> bool {
        false
    }

    /// Radio kill switch governing this type.
    fn rfkill_type(&self) -> Option<RfkillType> {
        None
    }

    /// Whether a profile may be generated from the running interface.
    fn supports_generation(&self) -> bool {
        false
    }

    /// Whether the device can carry VLANs.
    fn supports_vlans(&self) -> bool {
        false
    }
}

macro_rules! device_type_info {
    ($name:ident, $code:expr, $display:expr, $ctype:expr $(, $method:ident => $value:expr)* $(,)?) => {
        struct $name;

        impl DeviceTypeInfo for $name {
            fn type_code(&self) -> u32 {
                $code
            }

            fn display_name(&self) -> &'static str {
                $display
            }

            fn connection_type(&self) -> Option<ConnectionType> {
                $ctype
            }

            $(
                fn $method(&self) -> bool {
                    $value
                }
            )*
        }
    };
}

device_type_info!(EthernetType, device_type::ETHERNET, "Ethernet", Some(ConnectionType::Ethernet),
    requires_carrier => true, supports_generation => true, supports_vlans => true);
device_type_info!(VethType, device_type::VETH, "Veth", Some(ConnectionType::Ethernet),
    is_software => true, requires_carrier => true, supports_generation => true,
    supports_vlans => true);
device_type_info!(InfinibandType, device_type::INFINIBAND, "InfiniBand",
    Some(ConnectionType::Infiniband), requires_carrier => true, supports_generation => true);
device_type_info!(BondType, device_type::BOND, "Bond", Some(ConnectionType::Bond),
    is_software => true, supports_generation => true, supports_vlans => true);
device_type_info!(BridgeType, device_type::BRIDGE, "Bridge", Some(ConnectionType::Bridge),
    is_software => true, supports_generation => true, supports_vlans => true);
device_type_info!(TeamType, device_type::TEAM, "Team", Some(ConnectionType::Team),
    is_software => true, supports_generation => true, supports_vlans => true);
device_type_info!(VlanType, device_type::VLAN, "VLAN", Some(ConnectionType::Vlan),
    is_software => true, supports_generation => true);
device_type_info!(TunType, device_type::TUN, "TUN", None, is_software => true);
device_type_info!(MacvlanType, device_type::MACVLAN, "Macvlan", None, is_software => true);
device_type_info!(VxlanType, device_type::VXLAN, "VXLAN", None, is_software => true);
device_type_info!(IpTunnelType, device_type::IP_TUNNEL, "IP tunnel", None, is_software => true);
device_type_info!(GenericType, device_type::GENERIC, "Generic", Some(ConnectionType::Generic),
    supports_generation => true);
device_type_info!(BluetoothType, device_type::BLUETOOTH, "Bluetooth",
    Some(ConnectionType::Bluetooth));
device_type_info!(OlpcMeshType, device_type::OLPC_MESH, "OLPC Mesh", None);

/// Wi-Fi device type implementation.
struct WifiType;

impl DeviceTypeInfo for WifiType {
    fn type_code(&self) -> u32 {
        device_type::WIFI
    }

    fn display_name(&self) -> &'static str {
        "Wi-Fi"
    }

    fn connection_type(&self) -> Option<ConnectionType> {
        Some(ConnectionType::Wifi)
    }

    fn rfkill_type(&self) -> Option<RfkillType> {
        Some(RfkillType::Wlan)
    }
}

/// Mobile broadband modem implementation.
struct ModemType;

impl DeviceTypeInfo for ModemType {
    fn type_code(&self) -> u32 {
        device_type::MODEM
    }

    fn display_name(&self) -> &'static str {
        "Modem"
    }

    fn connection_type(&self) -> Option<ConnectionType> {
        Some(ConnectionType::Gsm)
    }

    fn rfkill_type(&self) -> Option<RfkillType> {
        Some(RfkillType::Wwan)
    }
}

/// WiMAX device type implementation.
struct WimaxType;

impl DeviceTypeInfo for WimaxType {
    fn type_code(&self) -> u32 {
        device_type::WIMAX
    }

    fn display_name(&self) -> &'static str {
        "WiMAX"
    }

    fn connection_type(&self) -> Option<ConnectionType> {
        None
    }

    fn rfkill_type(&self) -> Option<RfkillType> {
        Some(RfkillType::Wimax)
    }
}

/// Global registry of device types, keyed by type code.
static DEVICE_TYPE_REGISTRY: OnceLock<HashMap<u32, Box<dyn DeviceTypeInfo>>> = OnceLock::new();

fn registry() -> &'static HashMap<u32, Box<dyn DeviceTypeInfo>> {
    DEVICE_TYPE_REGISTRY.get_or_init(|| {
        let types: Vec<Box<dyn DeviceTypeInfo>> = vec![
            Box::new(EthernetType),
            Box::new(VethType),
            Box::new(WifiType),
            Box::new(InfinibandType),
            Box::new(BondType),
            Box::new(BridgeType),
            Box::new(TeamType),
            Box::new(VlanType),
            Box::new(TunType),
            Box::new(MacvlanType),
            Box::new(VxlanType),
            Box::new(IpTunnelType),
            Box::new(GenericType),
            Box::new(BluetoothType),
            Box::new(OlpcMeshType),
            Box::new(ModemType),
            Box::new(WimaxType),
        ];

        types
            .into_iter()
            .map(|info| (info.type_code(), info))
            .collect()
    })
}

/// Looks up device type information by type code.
pub fn get_device_type_info(code: u32) -> Option<&'static dyn DeviceTypeInfo> {
    registry().get(&code).map(|b| &**b)
}

/// Returns the display name for a device type code.
///
/// If the code is not recognized, returns a generic "Other(N)" string.
pub fn display_name_for_code(code: u32) -> String {
    get_device_type_info(code)
        .map(|info| info.display_name().to_string())
        .unwrap_or_else(|| format!("Other({code})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_type_info() {
        let info = get_device_type_info(device_type::ETHERNET).expect("Ethernet should be registered");
        assert_eq!(info.display_name(), "Ethernet");
        assert_eq!(info.connection_type(), Some(ConnectionType::Ethernet));
        assert!(info.requires_carrier());
        assert!(info.supports_generation());
        assert!(!info.is_software());
        assert_eq!(info.rfkill_type(), None);
    }

    #[test]
    fn bond_is_software() {
        let info = get_device_type_info(device_type::BOND).expect("Bond should be registered");
        assert!(info.is_software());
        assert!(!info.requires_carrier());
        assert!(info.supports_vlans());
    }

    #[test]
    fn wifi_is_radio_governed() {
        let info = get_device_type_info(device_type::WIFI).expect("Wi-Fi should be registered");
        assert_eq!(info.rfkill_type(), Some(RfkillType::Wlan));
        assert!(!info.supports_generation());
    }

    #[test]
    fn unknown_device_type() {
        assert!(get_device_type_info(999).is_none());
        assert_eq!(display_name_for_code(999), "Other(999)");
    }

    #[test]
    fn registry_is_consistent() {
        for (code, info) in registry().iter() {
            assert_eq!(*code, info.type_code(), "Registry key must match type code");
        }
    }
}
