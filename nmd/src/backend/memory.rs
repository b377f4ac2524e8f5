//! In-memory collaborators.
//!
//! Each type is a cheap handle around shared state, so a caller can keep a
//! clone to inspect or mutate what the manager sees after handing another
//! clone to it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ConnectionStore, Platform, PlatformError, PlatformLink, RfkillSource, SoftwareLinkRequest,
    StoreError,
};
use crate::api::models::{RfkillState, RfkillType};
use crate::api::profile::ConnectionProfile;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct StoreInner {
    connections: Vec<ConnectionProfile>,
    fail_writes: bool,
}

/// Connection store kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `connections`.
    pub fn with_connections(connections: impl IntoIterator<Item = ConnectionProfile>) -> Self {
        let store = Self::new();
        lock(&store.inner).connections = connections.into_iter().collect();
        store
    }

    /// Adds or replaces a profile without going through the manager.
    pub fn upsert(&self, profile: ConnectionProfile) {
        let mut inner = lock(&self.inner);
        match inner.connections.iter_mut().find(|c| c.uuid == profile.uuid) {
            Some(existing) => *existing = profile,
            None => inner.connections.push(profile),
        }
    }

    /// Removes a profile, returning it if it existed.
    pub fn remove(&self, uuid: &str) -> Option<ConnectionProfile> {
        let mut inner = lock(&self.inner);
        let pos = inner.connections.iter().position(|c| c.uuid == uuid)?;
        Some(inner.connections.remove(pos))
    }

    /// Makes every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.inner).fail_writes = fail;
    }

    /// Snapshot of the stored profiles.
    pub fn snapshot(&self) -> Vec<ConnectionProfile> {
        lock(&self.inner).connections.clone()
    }
}

impl ConnectionStore for MemoryStore {
    fn connections(&self) -> Vec<ConnectionProfile> {
        self.snapshot()
    }

    fn add_connection(&mut self, profile: ConnectionProfile) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        if inner.fail_writes {
            return Err(StoreError::Io("store is read-only".into()));
        }
        if inner.connections.iter().any(|c| c.uuid == profile.uuid) {
            return Err(StoreError::Duplicate(profile.uuid));
        }
        inner.connections.push(profile);
        Ok(())
    }

    fn set_timestamp(&mut self, uuid: &str, secs: u64) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        if inner.fail_writes {
            return Err(StoreError::Io("store is read-only".into()));
        }
        let profile = inner
            .connections
            .iter_mut()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| StoreError::Invalid(format!("no connection {uuid}")))?;
        profile.timestamp = secs;
        Ok(())
    }
}

#[derive(Debug)]
struct PlatformInner {
    links: Vec<PlatformLink>,
    created: Vec<SoftwareLinkRequest>,
    deleted: Vec<i32>,
    downed: Vec<i32>,
    wake_on_lan: HashSet<i32>,
    fail_create: bool,
    next_ifindex: i32,
}

impl Default for PlatformInner {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            created: Vec::new(),
            deleted: Vec::new(),
            downed: Vec::new(),
            wake_on_lan: HashSet::new(),
            fail_create: false,
            next_ifindex: 100,
        }
    }
}

/// Platform kept in memory.
///
/// Created software links are recorded and added to the link list, but no
/// event is emitted for them; callers feed `PlatformEvent`s to the manager
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<PlatformInner>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a platform exposing `links`.
    pub fn with_links(links: impl IntoIterator<Item = PlatformLink>) -> Self {
        let platform = Self::new();
        lock(&platform.inner).links = links.into_iter().collect();
        platform
    }

    /// Adds or replaces a link.
    pub fn set_link(&self, link: PlatformLink) {
        let mut inner = lock(&self.inner);
        match inner.links.iter_mut().find(|l| l.ifindex == link.ifindex) {
            Some(existing) => *existing = link,
            None => inner.links.push(link),
        }
    }

    /// Drops a link from the list.
    pub fn remove_link(&self, ifindex: i32) {
        lock(&self.inner).links.retain(|l| l.ifindex != ifindex);
    }

    /// Arms or disarms wake-on-LAN for a link.
    pub fn set_wake_on_lan(&self, ifindex: i32, armed: bool) {
        let mut inner = lock(&self.inner);
        if armed {
            inner.wake_on_lan.insert(ifindex);
        } else {
            inner.wake_on_lan.remove(&ifindex);
        }
    }

    /// Makes software link creation fail.
    pub fn set_fail_create(&self, fail: bool) {
        lock(&self.inner).fail_create = fail;
    }

    /// Looks up a link by interface name.
    pub fn link_by_name(&self, name: &str) -> Option<PlatformLink> {
        lock(&self.inner).links.iter().find(|l| l.name == name).cloned()
    }

    /// Software links created so far.
    pub fn created(&self) -> Vec<SoftwareLinkRequest> {
        lock(&self.inner).created.clone()
    }

    /// Links deleted so far.
    pub fn deleted(&self) -> Vec<i32> {
        lock(&self.inner).deleted.clone()
    }

    /// Links set down so far.
    pub fn downed(&self) -> Vec<i32> {
        lock(&self.inner).downed.clone()
    }
}

impl Platform for MemoryPlatform {
    fn links(&self) -> Vec<PlatformLink> {
        lock(&self.inner).links.clone()
    }

    fn create_software_link(&mut self, request: &SoftwareLinkRequest) -> Result<(), PlatformError> {
        let mut inner = lock(&self.inner);
        if inner.fail_create {
            return Err(PlatformError::Failed(format!("cannot create {}", request.name)));
        }
        if inner.links.iter().any(|l| l.name == request.name) {
            return Err(PlatformError::Exists(request.name.clone()));
        }
        let ifindex = inner.next_ifindex;
        inner.next_ifindex += 1;

        let mut link = PlatformLink::new(ifindex, request.name.clone(), request.link_type);
        link.parent_ifindex = request.parent_ifindex;
        link.vlan_id = request.vlan_id;
        link.p_key = request.p_key;
        inner.links.push(link);
        inner.created.push(request.clone());
        Ok(())
    }

    fn delete_link(&mut self, ifindex: i32) -> Result<(), PlatformError> {
        let mut inner = lock(&self.inner);
        let before = inner.links.len();
        inner.links.retain(|l| l.ifindex != ifindex);
        if inner.links.len() == before {
            return Err(PlatformError::NotFound(ifindex.to_string()));
        }
        inner.deleted.push(ifindex);
        Ok(())
    }

    fn set_link_down(&mut self, ifindex: i32) -> Result<(), PlatformError> {
        let mut inner = lock(&self.inner);
        if !inner.links.iter().any(|l| l.ifindex == ifindex) {
            return Err(PlatformError::NotFound(ifindex.to_string()));
        }
        inner.downed.push(ifindex);
        Ok(())
    }

    fn wake_on_lan(&self, ifindex: i32) -> bool {
        lock(&self.inner).wake_on_lan.contains(&ifindex)
    }
}

/// Host without any radio kill switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRfkill;

impl RfkillSource for NoRfkill {
    fn state(&self, _rtype: RfkillType) -> Option<RfkillState> {
        None
    }
}

/// Kill switches with fixed, adjustable states.
#[derive(Debug, Clone, Default)]
pub struct StaticRfkill {
    states: Arc<Mutex<HashMap<RfkillType, RfkillState>>>,
}

impl StaticRfkill {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the switch state for a radio class.
    pub fn set(&self, rtype: RfkillType, state: RfkillState) {
        lock(&self.states).insert(rtype, state);
    }
}

impl RfkillSource for StaticRfkill {
    fn state(&self, rtype: RfkillType) -> Option<RfkillState> {
        lock(&self.states).get(&rtype).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::profile::ConnectionType;
    use crate::backend::LinkType;

    #[test]
    fn store_rejects_duplicates() {
        let mut store = MemoryStore::new();
        let p = ConnectionProfile::new("Wired", ConnectionType::Ethernet);
        store.add_connection(p.clone()).unwrap();
        assert_eq!(store.add_connection(p.clone()), Err(StoreError::Duplicate(p.uuid.clone())));
        assert_eq!(store.connections().len(), 1);
    }

    #[test]
    fn store_failure_toggle() {
        let mut store = MemoryStore::new();
        store.set_fail_writes(true);
        let p = ConnectionProfile::new("Wired", ConnectionType::Ethernet);
        assert!(matches!(store.add_connection(p), Err(StoreError::Io(_))));
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        let mut handle = store.clone();
        let p = ConnectionProfile::new("Wired", ConnectionType::Ethernet);
        handle.add_connection(p.clone()).unwrap();
        assert_eq!(store.connection_by_uuid(&p.uuid), Some(p));
    }

    #[test]
    fn platform_creates_and_deletes() {
        let mut platform = MemoryPlatform::new();
        let req = SoftwareLinkRequest {
            name: "bond0".into(),
            link_type: LinkType::Bond,
            parent_ifindex: None,
            vlan_id: None,
            p_key: None,
        };
        platform.create_software_link(&req).unwrap();
        let ifindex = platform.link_by_name("bond0").map(|l| l.ifindex).unwrap();
        assert_eq!(ifindex, 100);
        assert!(matches!(
            platform.create_software_link(&req),
            Err(PlatformError::Exists(_))
        ));
        platform.delete_link(ifindex).unwrap();
        assert_eq!(platform.deleted(), vec![ifindex]);
        assert!(platform.link(ifindex).is_none());
    }

    #[test]
    fn rfkill_defaults_to_absent() {
        let rfkill = StaticRfkill::new();
        assert_eq!(rfkill.state(RfkillType::Wlan), None);
        rfkill.set(RfkillType::Wlan, RfkillState::HardBlocked);
        assert_eq!(rfkill.state(RfkillType::Wlan), Some(RfkillState::HardBlocked));
    }
}
