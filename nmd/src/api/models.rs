use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;

use crate::types::constants::timeouts;

const DEVICE_PATH_PREFIX: &str = "/org/freedesktop/NetworkManager/Devices/";
const ACTIVE_PATH_PREFIX: &str = "/org/freedesktop/NetworkManager/ActiveConnection/";

/// Identity of a device owned by the device registry.
///
/// Identifiers are allocated from a monotonically increasing counter and
/// never reused, so a handle held across a suspension point either resolves
/// to the same device or to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u64);

/// Identity of an active connection owned by the active connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActiveConnectionId(pub(crate) u64);

impl DeviceId {
    /// Returns the exported object path for this device.
    pub fn path(&self) -> String {
        format!("{DEVICE_PATH_PREFIX}{}", self.0)
    }

    /// Parses an exported device path back into an identifier.
    pub fn from_path(path: &str) -> Option<Self> {
        path.strip_prefix(DEVICE_PATH_PREFIX)?
            .parse()
            .ok()
            .map(Self)
    }
}

impl ActiveConnectionId {
    /// Returns the exported object path for this active connection.
    pub fn path(&self) -> String {
        format!("{ACTIVE_PATH_PREFIX}{}", self.0)
    }

    /// Parses an exported active connection path back into an identifier.
    pub fn from_path(path: &str) -> Option<Self> {
        path.strip_prefix(ACTIVE_PATH_PREFIX)?
            .parse()
            .ok()
            .map(Self)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "device/{}", self.0)
    }
}

impl Display for ActiveConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "active-connection/{}", self.0)
    }
}

/// Lifecycle state of an active connection.
///
/// The ordering of the variants is the order in which they are entered; an
/// active connection never moves to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActiveConnectionState {
    /// Created but not yet handed to a device.
    Unknown,
    /// Connection is activating (connecting).
    Activating,
    /// Connection is fully activated (connected).
    Activated,
    /// Connection is deactivating (disconnecting).
    Deactivating,
    /// Connection is fully deactivated (disconnected).
    Deactivated,
}

impl From<u32> for ActiveConnectionState {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::Activating,
            2 => Self::Activated,
            3 => Self::Deactivating,
            4 => Self::Deactivated,
            _ => Self::Unknown,
        }
    }
}

impl Display for ActiveConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Activating => write!(f, "activating"),
            Self::Activated => write!(f, "activated"),
            Self::Deactivating => write!(f, "deactivating"),
            Self::Deactivated => write!(f, "deactivated"),
        }
    }
}

/// Reason attached to an active connection state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStateReason {
    /// The reason is unknown.
    Unknown,
    /// No specific reason.
    None,
    /// User disconnected.
    UserDisconnected,
    /// Device disconnected.
    DeviceDisconnected,
    /// The daemon stopped.
    ServiceStopped,
    /// IP configuration was invalid.
    IpConfigInvalid,
    /// Connection timed out while activating.
    ConnectTimeout,
    /// The connection was removed.
    ConnectionRemoved,
    /// A dependency failed.
    DependencyFailed,
    /// Device realization failed.
    DeviceRealizeFailed,
    /// Device was removed.
    DeviceRemoved,
}

impl From<u32> for ConnectionStateReason {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::None,
            2 => Self::UserDisconnected,
            3 => Self::DeviceDisconnected,
            4 => Self::ServiceStopped,
            5 => Self::IpConfigInvalid,
            6 => Self::ConnectTimeout,
            11 => Self::ConnectionRemoved,
            12 => Self::DependencyFailed,
            13 => Self::DeviceRealizeFailed,
            14 => Self::DeviceRemoved,
            _ => Self::Unknown,
        }
    }
}

impl Display for ConnectionStateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::None => write!(f, "none"),
            Self::UserDisconnected => write!(f, "user disconnected"),
            Self::DeviceDisconnected => write!(f, "device disconnected"),
            Self::ServiceStopped => write!(f, "service stopped"),
            Self::IpConfigInvalid => write!(f, "IP configuration invalid"),
            Self::ConnectTimeout => write!(f, "connection timed out"),
            Self::ConnectionRemoved => write!(f, "connection was removed"),
            Self::DependencyFailed => write!(f, "dependency failed"),
            Self::DeviceRealizeFailed => write!(f, "device realization failed"),
            Self::DeviceRemoved => write!(f, "device was removed"),
        }
    }
}

/// Device states, in the order a device moves through them while activating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceState {
    /// State has not been determined yet.
    Unknown,
    /// Device is not managed by the daemon.
    Unmanaged,
    /// Device is managed but not yet available (no carrier, radio off).
    Unavailable,
    /// Device is available but not connected.
    Disconnected,
    /// Device is preparing to connect.
    Prepare,
    /// Device is being configured.
    Config,
    /// Device is waiting for secrets.
    NeedAuth,
    /// Device is requesting IP configuration.
    IpConfig,
    /// Device is checking IP connectivity.
    IpCheck,
    /// Device is waiting for secondary connections.
    Secondaries,
    /// Device is fully connected and operational.
    Activated,
    /// Device is disconnecting.
    Deactivating,
    /// Device connection failed.
    Failed,
}

impl DeviceState {
    /// Returns the numeric code used on the wire for this state.
    pub fn code(&self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Unmanaged => 10,
            Self::Unavailable => 20,
            Self::Disconnected => 30,
            Self::Prepare => 40,
            Self::Config => 50,
            Self::NeedAuth => 60,
            Self::IpConfig => 70,
            Self::IpCheck => 80,
            Self::Secondaries => 90,
            Self::Activated => 100,
            Self::Deactivating => 110,
            Self::Failed => 120,
        }
    }

    /// Returns `true` for the states between Prepare and Secondaries.
    pub fn is_activating(&self) -> bool {
        *self >= Self::Prepare && *self <= Self::Secondaries
    }

    /// The active connection state a device in this state implies for its
    /// current request.
    pub(crate) fn active_connection_state(&self) -> ActiveConnectionState {
        match self {
            s if s.is_activating() => ActiveConnectionState::Activating,
            Self::Activated => ActiveConnectionState::Activated,
            Self::Deactivating => ActiveConnectionState::Deactivating,
            _ => ActiveConnectionState::Deactivated,
        }
    }
}

impl From<u32> for DeviceState {
    fn from(value: u32) -> Self {
        match value {
            10 => Self::Unmanaged,
            20 => Self::Unavailable,
            30 => Self::Disconnected,
            40 => Self::Prepare,
            50 => Self::Config,
            60 => Self::NeedAuth,
            70 => Self::IpConfig,
            80 => Self::IpCheck,
            90 => Self::Secondaries,
            100 => Self::Activated,
            110 => Self::Deactivating,
            120 => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Unmanaged => write!(f, "Unmanaged"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Prepare => write!(f, "Preparing"),
            Self::Config => write!(f, "Configuring"),
            Self::NeedAuth => write!(f, "Needs authentication"),
            Self::IpConfig => write!(f, "Requesting IP configuration"),
            Self::IpCheck => write!(f, "Checking IP connectivity"),
            Self::Secondaries => write!(f, "Starting secondaries"),
            Self::Activated => write!(f, "Activated"),
            Self::Deactivating => write!(f, "Deactivating"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Reason attached to a device state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStateReason {
    /// No specific reason given.
    None,
    /// The reason is unknown.
    Unknown,
    /// The device became managed.
    NowManaged,
    /// The device stopped being managed.
    NowUnmanaged,
    /// The device could not be readied for configuration.
    ConfigFailed,
    /// The carrier/link status changed (e.g., cable unplugged).
    Carrier,
    /// An existing connection on the device was assumed.
    ConnectionAssumed,
    /// Required firmware is missing.
    FirmwareMissing,
    /// The device was removed.
    Removed,
    /// The daemon went to sleep.
    Sleeping,
    /// The profile of the active connection was removed.
    ConnectionRemoved,
    /// The user or a client requested the change.
    UserRequested,
    /// A master or parent connection failed.
    DependencyFailed,
    /// A new activation request replaced the current one.
    NewActivation,
}

impl DeviceStateReason {
    /// Returns the numeric code used on the wire for this reason.
    pub fn code(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Unknown => 1,
            Self::NowManaged => 2,
            Self::NowUnmanaged => 3,
            Self::ConfigFailed => 4,
            Self::FirmwareMissing => 35,
            Self::Removed => 36,
            Self::Sleeping => 37,
            Self::ConnectionRemoved => 38,
            Self::UserRequested => 39,
            Self::Carrier => 40,
            Self::ConnectionAssumed => 41,
            Self::DependencyFailed => 50,
            Self::NewActivation => 60,
        }
    }
}

impl From<u32> for DeviceStateReason {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::None,
            2 => Self::NowManaged,
            3 => Self::NowUnmanaged,
            4 => Self::ConfigFailed,
            35 => Self::FirmwareMissing,
            36 => Self::Removed,
            37 => Self::Sleeping,
            38 => Self::ConnectionRemoved,
            39 => Self::UserRequested,
            40 => Self::Carrier,
            41 => Self::ConnectionAssumed,
            50 => Self::DependencyFailed,
            60 => Self::NewActivation,
            _ => Self::Unknown,
        }
    }
}

impl Display for DeviceStateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Unknown => write!(f, "unknown"),
            Self::NowManaged => write!(f, "device is now managed"),
            Self::NowUnmanaged => write!(f, "device is now unmanaged"),
            Self::ConfigFailed => write!(f, "configuration failed"),
            Self::Carrier => write!(f, "carrier changed"),
            Self::ConnectionAssumed => write!(f, "existing connection assumed"),
            Self::FirmwareMissing => write!(f, "firmware missing"),
            Self::Removed => write!(f, "device removed"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::ConnectionRemoved => write!(f, "connection removed"),
            Self::UserRequested => write!(f, "user requested"),
            Self::DependencyFailed => write!(f, "dependency failed"),
            Self::NewActivation => write!(f, "new activation requested"),
        }
    }
}

impl From<DeviceStateReason> for ConnectionStateReason {
    fn from(reason: DeviceStateReason) -> Self {
        match reason {
            DeviceStateReason::UserRequested => Self::UserDisconnected,
            DeviceStateReason::Removed => Self::DeviceRemoved,
            DeviceStateReason::ConnectionRemoved => Self::ConnectionRemoved,
            DeviceStateReason::DependencyFailed => Self::DependencyFailed,
            DeviceStateReason::None => Self::None,
            _ => Self::DeviceDisconnected,
        }
    }
}

/// Overall daemon state, derived from the active connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NmState {
    /// State not computed yet.
    Unknown,
    /// Networking is disabled or the host is asleep.
    Asleep,
    /// No active connection.
    Disconnected,
    /// Connections are being torn down.
    Disconnecting,
    /// A connection is being established.
    Connecting,
    /// Only link-local connectivity.
    ConnectedLocal,
    /// Site-wide connectivity but no internet.
    ConnectedSite,
    /// Full internet connectivity.
    ConnectedGlobal,
}

impl NmState {
    /// Returns the numeric code used on the wire for this state.
    pub fn code(&self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Asleep => 10,
            Self::Disconnected => 20,
            Self::Disconnecting => 30,
            Self::Connecting => 40,
            Self::ConnectedLocal => 50,
            Self::ConnectedSite => 60,
            Self::ConnectedGlobal => 70,
        }
    }
}

impl Display for NmState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Asleep => write!(f, "asleep"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Connecting => write!(f, "connecting"),
            Self::ConnectedLocal => write!(f, "connected (local only)"),
            Self::ConnectedSite => write!(f, "connected (site only)"),
            Self::ConnectedGlobal => write!(f, "connected"),
        }
    }
}

/// Result of an internet connectivity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// No check has completed.
    #[default]
    Unknown,
    /// The host is not connected to any network.
    None,
    /// A captive portal intercepts traffic.
    Portal,
    /// Connected but the internet is unreachable.
    Limited,
    /// Full internet access.
    Full,
}

impl From<u32> for ConnectivityState {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::None,
            2 => Self::Portal,
            3 => Self::Limited,
            4 => Self::Full,
            _ => Self::Unknown,
        }
    }
}

impl Display for ConnectivityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::None => write!(f, "none"),
            Self::Portal => write!(f, "portal"),
            Self::Limited => write!(f, "limited"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Radio class a device belongs to for kill-switch purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RfkillType {
    /// Wi-Fi radios.
    Wlan,
    /// Mobile broadband radios.
    Wwan,
    /// WiMAX radios.
    Wimax,
}

impl RfkillType {
    /// All radio classes, in the order they are reported.
    pub const ALL: [RfkillType; 3] = [Self::Wlan, Self::Wwan, Self::Wimax];

    /// Parses the kernel's rfkill `type` attribute.
    pub fn from_kernel_name(name: &str) -> Option<Self> {
        match name {
            "wlan" => Some(Self::Wlan),
            "wwan" => Some(Self::Wwan),
            "wimax" => Some(Self::Wimax),
            _ => None,
        }
    }
}

impl Display for RfkillType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wlan => write!(f, "WiFi"),
            Self::Wwan => write!(f, "WWAN"),
            Self::Wimax => write!(f, "WiMAX"),
        }
    }
}

/// Kill-switch state reported for a radio class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RfkillState {
    /// Radio may transmit.
    #[default]
    Unblocked,
    /// Blocked by a software switch.
    SoftBlocked,
    /// Blocked by a hardware switch.
    HardBlocked,
}

impl Display for RfkillState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unblocked => write!(f, "unblocked"),
            Self::SoftBlocked => write!(f, "soft-blocked"),
            Self::HardBlocked => write!(f, "hard-blocked"),
        }
    }
}

bitflags! {
    /// Independent reasons a device is left unmanaged.
    ///
    /// A device is managed only while no flag is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UnmanagedFlags: u32 {
        /// Matched a user-configured unmanaged spec.
        const USER = 0x01;
        /// Transient daemon-internal reason (sleep, removal).
        const INTERNAL = 0x02;
        /// Default policy for the device type.
        const DEFAULT = 0x04;
    }
}

/// A permission the authorizer can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    EnableDisableNetwork,
    SleepWake,
    EnableDisableWifi,
    EnableDisableWwan,
    EnableDisableWimax,
    NetworkControl,
    WifiShareProtected,
    WifiShareOpen,
    SettingsModifySystem,
    SettingsModifyOwn,
    SettingsModifyHostname,
}

impl Permission {
    /// Every permission reported by `GetPermissions`.
    pub const ALL: [Permission; 11] = [
        Self::EnableDisableNetwork,
        Self::SleepWake,
        Self::EnableDisableWifi,
        Self::EnableDisableWwan,
        Self::EnableDisableWimax,
        Self::NetworkControl,
        Self::WifiShareProtected,
        Self::WifiShareOpen,
        Self::SettingsModifySystem,
        Self::SettingsModifyOwn,
        Self::SettingsModifyHostname,
    ];

    /// Returns the policy action name for this permission.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnableDisableNetwork => "org.freedesktop.NetworkManager.enable-disable-network",
            Self::SleepWake => "org.freedesktop.NetworkManager.sleep-wake",
            Self::EnableDisableWifi => "org.freedesktop.NetworkManager.enable-disable-wifi",
            Self::EnableDisableWwan => "org.freedesktop.NetworkManager.enable-disable-wwan",
            Self::EnableDisableWimax => "org.freedesktop.NetworkManager.enable-disable-wimax",
            Self::NetworkControl => "org.freedesktop.NetworkManager.network-control",
            Self::WifiShareProtected => "org.freedesktop.NetworkManager.wifi.share.protected",
            Self::WifiShareOpen => "org.freedesktop.NetworkManager.wifi.share.open",
            Self::SettingsModifySystem => "org.freedesktop.NetworkManager.settings.modify.system",
            Self::SettingsModifyOwn => "org.freedesktop.NetworkManager.settings.modify.own",
            Self::SettingsModifyHostname => {
                "org.freedesktop.NetworkManager.settings.modify.hostname"
            }
        }
    }

    /// The permission guarding user toggles of a radio class.
    pub fn for_radio(rtype: RfkillType) -> Self {
        match rtype {
            RfkillType::Wlan => Self::EnableDisableWifi,
            RfkillType::Wwan => Self::EnableDisableWwan,
            RfkillType::Wimax => Self::EnableDisableWimax,
        }
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Answer from the authorization backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// The subject holds the permission.
    Yes,
    /// The subject does not hold the permission.
    No,
    /// The subject could obtain the permission after interactive authentication.
    Challenge,
}

impl AuthResult {
    /// Returns `true` only for an unconditional grant.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Yes)
    }
}

impl Display for AuthResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
            Self::Challenge => write!(f, "auth"),
        }
    }
}

/// Who is asking for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// The daemon itself (assumption, dependency activation, autoconnect).
    Internal,
    /// A local user identified by uid and login name.
    User { uid: u32, name: String },
}

impl Subject {
    /// Convenience constructor for a user subject.
    pub fn user(uid: u32, name: impl Into<String>) -> Self {
        Self::User {
            uid,
            name: name.into(),
        }
    }

    /// Returns `true` for the daemon's own subject.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal)
    }

    /// Returns the login name for user subjects.
    pub fn user_name(&self) -> Option<&str> {
        match self {
            Self::Internal => None,
            Self::User { name, .. } => Some(name),
        }
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::User { uid, name } => write!(f, "{name} (uid {uid})"),
        }
    }
}

/// Snapshot of a device as exposed to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub udi: String,
    pub ifindex: Option<i32>,
    pub interface: String,
    pub ip_interface: String,
    pub link_type: crate::backend::LinkType,
    pub driver: Option<String>,
    pub hw_address: Option<String>,
    pub state: DeviceState,
    pub managed: bool,
    pub is_software: bool,
    pub nm_owned: bool,
    pub active_connection: Option<ActiveConnectionId>,
}

/// Snapshot of an active connection as exposed to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConnectionInfo {
    pub id: ActiveConnectionId,
    pub connection_uuid: String,
    pub connection_id: String,
    pub device: Option<DeviceId>,
    pub master: Option<ActiveConnectionId>,
    pub state: ActiveConnectionState,
    pub assumed: bool,
    pub vpn: bool,
    pub default4: bool,
    pub default6: bool,
}

/// Static configuration of the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Devices never managed, as `mac:<address>` or `interface-name:<name>`.
    pub unmanaged_specs: Vec<String>,
    /// Whether kill switches are consulted for radio devices.
    pub radio_management: bool,
    /// Interval between connectivity re-checks while a default route is up.
    pub connectivity_interval: Duration,
    /// Interval between firmware re-probes of devices missing firmware.
    pub firmware_reprobe_interval: Duration,
}

impl Default for ManagerConfig {
    /// Returns the default configuration.
    ///
    /// Defaults:
    /// - `unmanaged_specs`: empty
    /// - `radio_management`: `true`
    /// - `connectivity_interval`: 5 minutes
    /// - `firmware_reprobe_interval`: 30 seconds
    fn default() -> Self {
        Self {
            unmanaged_specs: Vec::new(),
            radio_management: true,
            connectivity_interval: timeouts::connectivity_interval(),
            firmware_reprobe_interval: timeouts::firmware_reprobe(),
        }
    }
}

/// Errors returned by manager operations.
///
/// The message carried by each variant is meant for humans; callers should
/// match on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    /// The requesting subject lacks the needed permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The referenced device does not exist or cannot host the request.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The referenced connection profile does not exist or is unusable.
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// The profile is already active elsewhere.
    #[error("connection already active: {0}")]
    ConnectionAlreadyActive(String),

    /// The referenced active connection is not active.
    #[error("connection not active: {0}")]
    ConnectionNotActive(String),

    /// A master, parent or base connection could not be satisfied.
    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    /// The device is not managed.
    #[error("device unmanaged: {0}")]
    UnmanagedDevice(String),

    /// No device type can handle the profile's type.
    #[error("unsupported connection type: {0}")]
    UnsupportedConnectionType(String),

    /// The device does not allow automatic activation.
    #[error("autoconnect not allowed: {0}")]
    AutoconnectNotAllowed(String),

    /// An internal or collaborator failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::backend::StoreError> for ManagerError {
    fn from(e: crate::backend::StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<crate::backend::AuthError> for ManagerError {
    fn from(e: crate::backend::AuthError) -> Self {
        Self::PermissionDenied(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_state_round_trips_codes() {
        for state in [
            DeviceState::Unmanaged,
            DeviceState::Unavailable,
            DeviceState::Disconnected,
            DeviceState::Prepare,
            DeviceState::Config,
            DeviceState::NeedAuth,
            DeviceState::IpConfig,
            DeviceState::IpCheck,
            DeviceState::Secondaries,
            DeviceState::Activated,
            DeviceState::Deactivating,
            DeviceState::Failed,
        ] {
            assert_eq!(DeviceState::from(state.code()), state);
        }
        assert_eq!(DeviceState::from(999), DeviceState::Unknown);
    }

    #[test]
    fn device_state_order_follows_codes() {
        assert!(DeviceState::Unmanaged < DeviceState::Unavailable);
        assert!(DeviceState::Disconnected < DeviceState::Prepare);
        assert!(DeviceState::Activated < DeviceState::Deactivating);
        assert!(DeviceState::IpConfig.is_activating());
        assert!(!DeviceState::Activated.is_activating());
        assert!(!DeviceState::Disconnected.is_activating());
    }

    #[test]
    fn device_state_maps_to_active_connection_state() {
        assert_eq!(
            DeviceState::Config.active_connection_state(),
            ActiveConnectionState::Activating
        );
        assert_eq!(
            DeviceState::Activated.active_connection_state(),
            ActiveConnectionState::Activated
        );
        assert_eq!(
            DeviceState::Deactivating.active_connection_state(),
            ActiveConnectionState::Deactivating
        );
        assert_eq!(
            DeviceState::Failed.active_connection_state(),
            ActiveConnectionState::Deactivated
        );
        assert_eq!(
            DeviceState::Unmanaged.active_connection_state(),
            ActiveConnectionState::Deactivated
        );
    }

    #[test]
    fn active_connection_state_is_ordered() {
        assert!(ActiveConnectionState::Activating < ActiveConnectionState::Activated);
        assert!(ActiveConnectionState::Deactivating < ActiveConnectionState::Deactivated);
        assert_eq!(ActiveConnectionState::from(2), ActiveConnectionState::Activated);
        assert_eq!(ActiveConnectionState::from(77), ActiveConnectionState::Unknown);
        assert_eq!(format!("{}", ActiveConnectionState::Deactivated), "deactivated");
    }

    #[test]
    fn reason_codes_round_trip() {
        for reason in [
            DeviceStateReason::NowManaged,
            DeviceStateReason::Sleeping,
            DeviceStateReason::ConnectionAssumed,
            DeviceStateReason::DependencyFailed,
            DeviceStateReason::UserRequested,
        ] {
            assert_eq!(DeviceStateReason::from(reason.code()), reason);
        }
        assert_eq!(
            ConnectionStateReason::from(DeviceStateReason::Removed),
            ConnectionStateReason::DeviceRemoved
        );
    }

    #[test]
    fn nm_state_ordering_and_codes() {
        assert!(NmState::Asleep < NmState::Disconnected);
        assert!(NmState::Connecting < NmState::ConnectedLocal);
        assert!(NmState::ConnectedSite < NmState::ConnectedGlobal);
        assert_eq!(NmState::ConnectedGlobal.code(), 70);
        assert_eq!(format!("{}", NmState::ConnectedLocal), "connected (local only)");
    }

    #[test]
    fn object_paths_parse_back() {
        let dev = DeviceId(7);
        assert_eq!(DeviceId::from_path(&dev.path()), Some(dev));
        let ac = ActiveConnectionId(3);
        assert_eq!(ActiveConnectionId::from_path(&ac.path()), Some(ac));
        assert_eq!(ActiveConnectionId::from_path("/"), None);
        assert_eq!(DeviceId::from_path(&ac.path()), None);
    }

    #[test]
    fn unmanaged_flags_are_independent() {
        let mut flags = UnmanagedFlags::USER | UnmanagedFlags::INTERNAL;
        flags.remove(UnmanagedFlags::INTERNAL);
        assert!(flags.contains(UnmanagedFlags::USER));
        flags.remove(UnmanagedFlags::USER);
        assert!(flags.is_empty());
    }

    #[test]
    fn auth_result_display() {
        assert_eq!(AuthResult::Yes.to_string(), "yes");
        assert_eq!(AuthResult::No.to_string(), "no");
        assert_eq!(AuthResult::Challenge.to_string(), "auth");
        assert!(!AuthResult::Challenge.is_granted());
    }

    #[test]
    fn permission_names() {
        assert_eq!(Permission::ALL.len(), 11);
        assert!(Permission::NetworkControl.as_str().ends_with("network-control"));
        assert_eq!(
            Permission::for_radio(RfkillType::Wwan),
            Permission::EnableDisableWwan
        );
    }

    #[test]
    fn error_display() {
        let e = ManagerError::DependencyFailed("Device cannot be its own master".into());
        assert_eq!(e.to_string(), "dependency failed: Device cannot be its own master");
    }
}
