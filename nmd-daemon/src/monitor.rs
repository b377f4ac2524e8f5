//! Polls the host and feeds what changed to the manager.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use nmd::backend::{ManagerInput, Platform, PlatformEvent, PlatformLink};

use crate::profiles::ProfileDir;
use crate::sysfs::{SysfsPlatform, SysfsRfkill};

/// Link events turning `old` into `new`, both keyed by ifindex.
pub fn diff_links(
    old: &BTreeMap<i32, PlatformLink>,
    new: &BTreeMap<i32, PlatformLink>,
) -> Vec<PlatformEvent> {
    let mut events: Vec<PlatformEvent> = old
        .keys()
        .filter(|ifindex| !new.contains_key(ifindex))
        .map(|&ifindex| PlatformEvent::LinkRemoved { ifindex })
        .collect();
    for (ifindex, link) in new {
        match old.get(ifindex) {
            None => events.push(PlatformEvent::LinkAdded(link.clone())),
            Some(previous) if previous != link => events.push(PlatformEvent::LinkChanged(link.clone())),
            Some(_) => {}
        }
    }
    events
}

fn snapshot(platform: &SysfsPlatform) -> BTreeMap<i32, PlatformLink> {
    platform.links().into_iter().map(|l| (l.ifindex, l)).collect()
}

/// Host state the watcher compares against.
pub struct HostWatcher {
    platform: SysfsPlatform,
    rfkill: SysfsRfkill,
    profiles: ProfileDir,
    links: BTreeMap<i32, PlatformLink>,
    switches: Vec<Option<nmd::RfkillState>>,
}

impl HostWatcher {
    /// Starts from the current host state, which the manager enumerates
    /// itself on start.
    pub fn new(platform: SysfsPlatform, rfkill: SysfsRfkill, profiles: ProfileDir) -> Self {
        let links = snapshot(&platform);
        let switches = rfkill.snapshot();
        Self {
            platform,
            rfkill,
            profiles,
            links,
            switches,
        }
    }

    /// Everything that changed since the previous poll.
    pub fn poll(&mut self) -> Vec<ManagerInput> {
        let links = snapshot(&self.platform);
        let mut inputs: Vec<ManagerInput> = diff_links(&self.links, &links)
            .into_iter()
            .map(ManagerInput::Platform)
            .collect();
        self.links = links;

        let switches = self.rfkill.snapshot();
        if switches != self.switches {
            debug!("kill switch state changed");
            self.switches = switches;
            inputs.push(ManagerInput::RfkillChanged);
        }

        match self.profiles.reload() {
            Ok(events) => inputs.extend(events.into_iter().map(ManagerInput::Settings)),
            Err(e) => warn!("failed to reload {}: {e}", self.profiles.dir().display()),
        }
        inputs
    }

    /// Polls every `interval` until `stop` fires or the manager goes away.
    pub async fn run(
        mut self,
        interval: Duration,
        tx: mpsc::UnboundedSender<ManagerInput>,
        mut stop: watch::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
            }
            for input in self.poll() {
                if tx.send(input).is_err() {
                    debug!("manager stopped, host watcher exiting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmd::backend::LinkType;

    fn links(list: &[PlatformLink]) -> BTreeMap<i32, PlatformLink> {
        list.iter().map(|l| (l.ifindex, l.clone())).collect()
    }

    #[test]
    fn diff_reports_removed_then_added_and_changed() {
        let eth0 = PlatformLink::new(2, "eth0", LinkType::Ethernet);
        let eth1 = PlatformLink::new(3, "eth1", LinkType::Ethernet);
        let bond0 = PlatformLink::new(4, "bond0", LinkType::Bond);
        let old = links(&[eth0.clone(), eth1.clone()]);
        let new = links(&[eth0.clone().with_carrier(true), bond0.clone()]);

        assert_eq!(
            diff_links(&old, &new),
            vec![
                PlatformEvent::LinkRemoved { ifindex: 3 },
                PlatformEvent::LinkChanged(eth0.with_carrier(true)),
                PlatformEvent::LinkAdded(bond0),
            ]
        );
        assert!(diff_links(&new, &new).is_empty());
    }

    #[test]
    fn poll_sees_new_links_and_profiles() {
        let root = tempfile::tempdir().unwrap();
        let net = root.path().join("sys/class/net/eth0");
        std::fs::create_dir_all(&net).unwrap();
        let profiles_dir = root.path().join("profiles");
        let profiles = ProfileDir::open(&profiles_dir).unwrap();
        let mut watcher = HostWatcher::new(
            SysfsPlatform::new(root.path()),
            SysfsRfkill::new(root.path()),
            profiles,
        );
        assert!(watcher.poll().is_empty());

        std::fs::write(net.join("ifindex"), "2\n").unwrap();
        std::fs::write(net.join("type"), "1\n").unwrap();
        let inputs = watcher.poll();
        assert!(matches!(
            inputs.as_slice(),
            [ManagerInput::Platform(PlatformEvent::LinkAdded(link))] if link.name == "eth0"
        ));

        std::fs::create_dir_all(&profiles_dir).unwrap();
        let profile = nmd::builders::ProfileBuilder::new(nmd::ConnectionType::Ethernet, "Wired").build();
        std::fs::write(
            profiles_dir.join("wired.toml"),
            toml::to_string(&profile).unwrap(),
        )
        .unwrap();
        assert_eq!(
            watcher.poll(),
            vec![ManagerInput::Settings(nmd::backend::SettingsEvent::Added(profile.uuid))]
        );
    }
}
