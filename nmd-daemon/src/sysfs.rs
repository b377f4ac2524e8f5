//! Host links and kill switches read from sysfs and procfs.
//!
//! Links are enumerated from `sys/class/net`, their IPv6 addresses from
//! `proc/net/if_inet6` and the IPv4 default route from `proc/net/route`,
//! all relative to a configurable root. Software links are created and
//! removed with `ip link`.

use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nmd::backend::{
    LinkConfig, LinkType, Platform, PlatformError, PlatformLink, RfkillSource, SoftwareLinkRequest,
};
use nmd::{RfkillState, RfkillType};

// ARPHRD_* values from <linux/if_arp.h>
const ARPHRD_ETHER: u32 = 1;
const ARPHRD_INFINIBAND: u32 = 32;
const ARPHRD_LOOPBACK: u32 = 772;
const ARPHRD_NONE: u32 = 65534;
const ARPHRD_IPGRE: u32 = 778;

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number<T: std::str::FromStr>(path: &Path) -> Option<T> {
    read_trimmed(path)?.parse().ok()
}

/// Value of `key` in a `KEY=value` uevent file.
fn uevent_value(uevent: &str, key: &str) -> Option<String> {
    uevent.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::to_string)
    })
}

fn link_name(path: &Path) -> Option<String> {
    fs::read_link(path)
        .ok()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Classifies a link from its ARP type, uevent device type and driver.
fn classify(arp_type: u32, devtype: Option<&str>, driver: Option<&str>, wireless: bool) -> LinkType {
    if wireless {
        return LinkType::Wifi;
    }
    match devtype {
        Some("bond") => return LinkType::Bond,
        Some("bridge") => return LinkType::Bridge,
        Some("vlan") => return LinkType::Vlan,
        Some("wlan") => return LinkType::Wifi,
        Some("wwan") => return LinkType::WwanEthernet,
        Some("wimax") => return LinkType::Wimax,
        Some("vxlan") => return LinkType::Vxlan,
        Some("macvlan") | Some("macvtap") => return LinkType::Macvlan,
        _ => {}
    }
    match driver {
        Some("team") => return LinkType::Team,
        Some("veth") => return LinkType::Veth,
        Some("tun") => return LinkType::Tun,
        _ => {}
    }
    match arp_type {
        ARPHRD_ETHER => LinkType::Ethernet,
        ARPHRD_INFINIBAND => LinkType::Infiniband,
        ARPHRD_LOOPBACK => LinkType::Loopback,
        ARPHRD_IPGRE => LinkType::Gre,
        ARPHRD_NONE => LinkType::Tun,
        _ => LinkType::Unknown,
    }
}

/// Formats one 32-digit hex address from `if_inet6`.
fn inet6_address(hex: &str, prefix: &str) -> Option<String> {
    if hex.len() != 32 {
        return None;
    }
    let mut segments = [0u16; 8];
    for (i, segment) in segments.iter_mut().enumerate() {
        *segment = u16::from_str_radix(&hex[i * 4..i * 4 + 4], 16).ok()?;
    }
    let prefix = u8::from_str_radix(prefix, 16).ok()?;
    Some(format!("{}/{prefix}", std::net::Ipv6Addr::from(segments)))
}

/// Kernel links under a root directory.
#[derive(Debug, Clone)]
pub struct SysfsPlatform {
    root: PathBuf,
}

impl SysfsPlatform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn net_dir(&self) -> PathBuf {
        self.root.join("sys/class/net")
    }

    fn read_link(&self, name: &str) -> Option<PlatformLink> {
        let dir = self.net_dir().join(name);
        let ifindex: i32 = read_number(&dir.join("ifindex"))?;
        let arp_type: u32 = read_number(&dir.join("type")).unwrap_or(0);
        let uevent = read_trimmed(&dir.join("uevent")).unwrap_or_default();
        let devtype = uevent_value(&uevent, "DEVTYPE");
        let driver = link_name(&dir.join("device/driver"));
        let wireless = dir.join("wireless").is_dir() || dir.join("phy80211").exists();
        let link_type = classify(arp_type, devtype.as_deref(), driver.as_deref(), wireless);

        let udi = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
        let mut link = PlatformLink::new(ifindex, name, link_type)
            .with_udi(udi.to_string_lossy())
            .with_carrier(read_number::<u8>(&dir.join("carrier")) == Some(1));
        if let Some(driver) = driver {
            link = link.with_driver(driver);
        }
        if let Some(address) = read_trimmed(&dir.join("address")).filter(|a| !a.is_empty()) {
            link = link.with_hw_address(address);
        }
        if link_type == LinkType::Vlan
            && let Some((parent, vlan_id)) = self.vlan_info(name)
        {
            if let Some(parent_ifindex) = read_number(&self.net_dir().join(parent).join("ifindex")) {
                link = link.with_parent(parent_ifindex);
            }
            link = link.with_vlan_id(vlan_id);
        }
        link.config = LinkConfig {
            master: link_name(&dir.join("master")),
            ..LinkConfig::default()
        };
        Some(link)
    }

    /// Parent interface and id of a VLAN from `proc/net/vlan/<name>`.
    fn vlan_info(&self, name: &str) -> Option<(String, u16)> {
        let text = fs::read_to_string(self.root.join("proc/net/vlan").join(name)).ok()?;
        let mut vlan_id = None;
        let mut parent = None;
        for line in text.lines() {
            if let Some(rest) = line.split("VID:").nth(1) {
                vlan_id = rest.split_whitespace().next().and_then(|v| v.parse().ok());
            }
            if let Some(rest) = line.strip_prefix("Device:") {
                parent = Some(rest.trim().to_string());
            }
        }
        Some((parent?, vlan_id?))
    }

    /// Adds addresses and default routes from procfs to `links`.
    fn apply_ip_config(&self, links: &mut [PlatformLink]) {
        if let Ok(text) = fs::read_to_string(self.root.join("proc/net/if_inet6")) {
            for line in text.lines() {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let &[hex, _, prefix, scope, flags, name] = fields.as_slice() else {
                    continue;
                };
                // Only global addresses count as configuration.
                if scope != "00" {
                    continue;
                }
                let Some(address) = inet6_address(hex, prefix) else {
                    continue;
                };
                if let Some(link) = links.iter_mut().find(|l| l.name == name) {
                    link.config.ipv6_addresses.push(address);
                    // IFA_F_PERMANENT unset means autoconfigured.
                    let flags = u32::from_str_radix(flags, 16).unwrap_or(0);
                    link.config.ipv6_dynamic |= flags & 0x80 == 0;
                }
            }
        }

        if let Ok(text) = fs::read_to_string(self.root.join("proc/net/route")) {
            for line in text.lines().skip(1) {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() > 2
                    && fields[1] == "00000000"
                    && let Some(link) = links.iter_mut().find(|l| l.name == fields[0])
                {
                    link.config.default4 = true;
                }
            }
        }
    }

    fn name_of(&self, ifindex: i32) -> Result<String, PlatformError> {
        self.link(ifindex)
            .map(|l| l.name)
            .ok_or_else(|| PlatformError::NotFound(ifindex.to_string()))
    }
}

fn ip_link(args: &[&str]) -> Result<(), PlatformError> {
    debug!("running ip link {}", args.join(" "));
    let output = Command::new("ip")
        .arg("link")
        .args(args)
        .output()
        .map_err(|e| PlatformError::Failed(format!("failed to run ip: {e}")))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.contains("File exists") {
        return Err(PlatformError::Exists(args.get(1).copied().unwrap_or_default().to_string()));
    }
    Err(PlatformError::Failed(stderr))
}

impl Platform for SysfsPlatform {
    fn links(&self) -> Vec<PlatformLink> {
        let names: Vec<String> = match fs::read_dir(self.net_dir()) {
            Ok(read) => read
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                warn!("failed to list {}: {e}", self.net_dir().display());
                return Vec::new();
            }
        };
        let mut links: Vec<PlatformLink> = names.iter().filter_map(|n| self.read_link(n)).collect();
        links.sort_by_key(|l| l.ifindex);
        self.apply_ip_config(&mut links);
        links
    }

    fn create_software_link(&mut self, request: &SoftwareLinkRequest) -> Result<(), PlatformError> {
        let name = request.name.as_str();
        match request.link_type {
            LinkType::Bond => ip_link(&["add", name, "type", "bond"]),
            LinkType::Bridge => ip_link(&["add", name, "type", "bridge"]),
            LinkType::Team => Err(PlatformError::Failed(format!(
                "team devices need teamd to create {name}"
            ))),
            LinkType::Vlan => {
                let parent = self.name_of(request.parent_ifindex.unwrap_or_default())?;
                let id = request.vlan_id.unwrap_or_default().to_string();
                ip_link(&["add", "link", &parent, "name", name, "type", "vlan", "id", &id])
            }
            LinkType::Infiniband => {
                let parent = self.name_of(request.parent_ifindex.unwrap_or_default())?;
                let p_key = format!("{:#06x}", request.p_key.unwrap_or_default());
                ip_link(&["add", "link", &parent, "name", name, "type", "ipoib", "pkey", &p_key])
            }
            other => Err(PlatformError::Failed(format!("cannot create {other} link {name}"))),
        }
    }

    fn delete_link(&mut self, ifindex: i32) -> Result<(), PlatformError> {
        let name = self.name_of(ifindex)?;
        ip_link(&["delete", "dev", &name])
    }

    fn set_link_down(&mut self, ifindex: i32) -> Result<(), PlatformError> {
        let name = self.name_of(ifindex)?;
        ip_link(&["set", "dev", &name, "down"])
    }

    fn wake_on_lan(&self, ifindex: i32) -> bool {
        let Ok(name) = self.name_of(ifindex) else {
            return false;
        };
        read_trimmed(&self.net_dir().join(name).join("device/power/wakeup")).as_deref()
            == Some("enabled")
    }
}

/// Kill switches listed under `sys/class/rfkill`.
#[derive(Debug, Clone)]
pub struct SysfsRfkill {
    root: PathBuf,
}

impl SysfsRfkill {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Current state of every radio class, for change detection.
    pub fn snapshot(&self) -> Vec<Option<RfkillState>> {
        RfkillType::ALL.iter().map(|&t| self.state(t)).collect()
    }
}

impl RfkillSource for SysfsRfkill {
    fn state(&self, rtype: RfkillType) -> Option<RfkillState> {
        let wanted = match rtype {
            RfkillType::Wlan => "wlan",
            RfkillType::Wwan => "wwan",
            RfkillType::Wimax => "wimax",
        };
        let read = fs::read_dir(self.root.join("sys/class/rfkill")).ok()?;
        let mut found = None;
        for dir in read.filter_map(|e| e.ok()).map(|e| e.path()) {
            if read_trimmed(&dir.join("type")).as_deref() != Some(wanted) {
                continue;
            }
            let state = if read_number::<u8>(&dir.join("hard")) == Some(1) {
                RfkillState::HardBlocked
            } else if read_number::<u8>(&dir.join("soft")) == Some(1) {
                RfkillState::SoftBlocked
            } else {
                RfkillState::Unblocked
            };
            // The most restrictive switch wins.
            found = Some(match (found, state) {
                (Some(RfkillState::HardBlocked), _) | (_, RfkillState::HardBlocked) => {
                    RfkillState::HardBlocked
                }
                (Some(RfkillState::SoftBlocked), _) | (_, RfkillState::SoftBlocked) => {
                    RfkillState::SoftBlocked
                }
                _ => RfkillState::Unblocked,
            });
        }
        found
    }
}
