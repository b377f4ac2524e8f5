//! Active connections and the set that owns them.
//!
//! An [`ActiveConnection`] records one activation of a profile. Its state
//! only moves forward; once it reaches Deactivated it stays in the set until
//! the next cleanup pass, so the final state change is delivered before the
//! object disappears.

use crate::api::models::{
    ActiveConnectionId, ActiveConnectionInfo, ActiveConnectionState, DeviceId, Subject,
};
use crate::api::profile::ConnectionProfile;

#[derive(Debug, Clone)]
pub(crate) struct ActiveConnection {
    pub(crate) id: ActiveConnectionId,
    /// Snapshot of the profile taken when the activation was requested.
    pub(crate) profile: ConnectionProfile,
    pub(crate) device: Option<DeviceId>,
    pub(crate) master: Option<ActiveConnectionId>,
    /// Connection a VPN tunnels over.
    pub(crate) base: Option<ActiveConnectionId>,
    pub(crate) state: ActiveConnectionState,
    pub(crate) assumed: bool,
    pub(crate) default4: bool,
    pub(crate) default6: bool,
    pub(crate) subject: Subject,
    pub(crate) specific_object: Option<String>,
    /// Whether clients were told about this connection.
    pub(crate) exported: bool,
}

impl ActiveConnection {
    pub(crate) fn new(
        id: ActiveConnectionId,
        profile: ConnectionProfile,
        device: Option<DeviceId>,
        subject: Subject,
    ) -> Self {
        Self {
            id,
            profile,
            device,
            master: None,
            base: None,
            state: ActiveConnectionState::Unknown,
            assumed: false,
            default4: false,
            default6: false,
            subject,
            specific_object: None,
            exported: false,
        }
    }

    pub(crate) fn uuid(&self) -> &str {
        &self.profile.uuid
    }

    pub(crate) fn is_vpn(&self) -> bool {
        self.profile.is_vpn()
    }

    pub(crate) fn user_requested(&self) -> bool {
        !self.subject.is_internal()
    }

    pub(crate) fn has_default_route(&self) -> bool {
        self.default4 || self.default6
    }

    pub(crate) fn info(&self) -> ActiveConnectionInfo {
        ActiveConnectionInfo {
            id: self.id,
            connection_uuid: self.profile.uuid.clone(),
            connection_id: self.profile.id.clone(),
            device: self.device,
            master: self.master,
            state: self.state,
            assumed: self.assumed,
            vpn: self.is_vpn(),
            default4: self.default4,
            default6: self.default6,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ActiveConnectionSet {
    entries: Vec<ActiveConnection>,
    next_id: u64,
    cleanup_pending: bool,
    primary: Option<ActiveConnectionId>,
    activating: Option<ActiveConnectionId>,
}

impl Default for ActiveConnectionSet {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            cleanup_pending: false,
            primary: None,
            activating: None,
        }
    }
}

impl ActiveConnectionSet {
    /// Reserves an identifier for a connection that is not added yet.
    pub(crate) fn allocate_id(&mut self) -> ActiveConnectionId {
        let id = ActiveConnectionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds a connection. Returns `false` if its identifier is taken.
    pub(crate) fn add(&mut self, ac: ActiveConnection) -> bool {
        if self.get(ac.id).is_some() {
            return false;
        }
        self.entries.push(ac);
        true
    }

    /// Removes a connection. Returns `true` if clients must be told.
    pub(crate) fn remove(&mut self, id: ActiveConnectionId) -> bool {
        let Some(pos) = self.entries.iter().position(|ac| ac.id == id) else {
            return false;
        };
        self.entries.remove(pos).exported
    }

    pub(crate) fn get(&self, id: ActiveConnectionId) -> Option<&ActiveConnection> {
        self.entries.iter().find(|ac| ac.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: ActiveConnectionId) -> Option<&mut ActiveConnection> {
        self.entries.iter_mut().find(|ac| ac.id == id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ActiveConnection> {
        self.entries.iter()
    }

    /// The live connection of a profile, skipping ones already deactivated.
    pub(crate) fn find_by_profile(&self, uuid: &str) -> Option<ActiveConnectionId> {
        self.entries
            .iter()
            .find(|ac| ac.uuid() == uuid && ac.state < ActiveConnectionState::Deactivated)
            .map(|ac| ac.id)
    }

    /// Connections enslaved to `master`.
    pub(crate) fn dependents_of(&self, master: ActiveConnectionId) -> Vec<ActiveConnectionId> {
        self.entries
            .iter()
            .filter(|ac| ac.master == Some(master))
            .map(|ac| ac.id)
            .collect()
    }

    /// VPNs tunnelling over `base`.
    pub(crate) fn vpns_on(&self, base: ActiveConnectionId) -> Vec<ActiveConnectionId> {
        self.entries
            .iter()
            .filter(|ac| ac.base == Some(base))
            .map(|ac| ac.id)
            .collect()
    }

    /// Moves a connection forward. Returns the previous state, or `None` if
    /// the connection is unknown or the move would go backwards.
    pub(crate) fn set_state(
        &mut self,
        id: ActiveConnectionId,
        state: ActiveConnectionState,
    ) -> Option<ActiveConnectionState> {
        let ac = self.get_mut(id)?;
        if state <= ac.state {
            return None;
        }
        let old = ac.state;
        ac.state = state;
        if state == ActiveConnectionState::Deactivated {
            self.cleanup_pending = true;
        }
        Some(old)
    }

    pub(crate) fn has_pending_cleanup(&self) -> bool {
        self.cleanup_pending
    }

    /// Deactivated connections due for removal, clearing the pending flag.
    pub(crate) fn take_deactivated(&mut self) -> Vec<ActiveConnectionId> {
        self.cleanup_pending = false;
        self.entries
            .iter()
            .filter(|ac| ac.state == ActiveConnectionState::Deactivated)
            .map(|ac| ac.id)
            .collect()
    }

    pub(crate) fn primary(&self) -> Option<ActiveConnectionId> {
        self.primary
    }

    pub(crate) fn activating(&self) -> Option<ActiveConnectionId> {
        self.activating
    }

    /// Recomputes the primary and activating connections.
    ///
    /// The primary connection is the first activated one holding the IPv4
    /// default route, else the IPv6 one. The activating connection is the
    /// first non-assumed activation still in progress that will want a
    /// default route. Returns which of the two changed.
    pub(crate) fn recompute_policy(&mut self) -> (bool, bool) {
        let activated = |ac: &&ActiveConnection| ac.state == ActiveConnectionState::Activated;
        let primary = self
            .entries
            .iter()
            .filter(activated)
            .find(|ac| ac.default4)
            .or_else(|| self.entries.iter().filter(activated).find(|ac| ac.default6))
            .map(|ac| ac.id);
        let activating = self
            .entries
            .iter()
            .find(|ac| {
                ac.state == ActiveConnectionState::Activating
                    && !ac.assumed
                    && !ac.profile.is_slave()
            })
            .map(|ac| ac.id);

        let changed = (primary != self.primary, activating != self.activating);
        self.primary = primary;
        self.activating = activating;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::profile::ConnectionType;

    fn ac(set: &mut ActiveConnectionSet, id: &str) -> ActiveConnectionId {
        let ac_id = set.allocate_id();
        let profile = ConnectionProfile::new(id, ConnectionType::Ethernet);
        assert!(set.add(ActiveConnection::new(ac_id, profile, None, Subject::Internal)));
        ac_id
    }

    #[test]
    fn state_never_moves_backwards() {
        let mut set = ActiveConnectionSet::default();
        let a = ac(&mut set, "a");
        assert_eq!(
            set.set_state(a, ActiveConnectionState::Activated),
            Some(ActiveConnectionState::Unknown)
        );
        assert_eq!(set.set_state(a, ActiveConnectionState::Activating), None);
        assert_eq!(set.set_state(a, ActiveConnectionState::Activated), None);
        assert_eq!(
            set.get(a).map(|ac| ac.state),
            Some(ActiveConnectionState::Activated)
        );
    }

    #[test]
    fn deactivated_connections_survive_until_cleanup() {
        let mut set = ActiveConnectionSet::default();
        let a = ac(&mut set, "a");
        let b = ac(&mut set, "b");
        set.set_state(a, ActiveConnectionState::Deactivated);
        assert!(set.has_pending_cleanup());
        assert!(set.get(a).is_some());

        assert_eq!(set.take_deactivated(), vec![a]);
        assert!(!set.has_pending_cleanup());
        assert!(set.get(b).is_some());
    }

    #[test]
    fn find_by_profile_skips_deactivated() {
        let mut set = ActiveConnectionSet::default();
        let a = ac(&mut set, "a");
        let uuid = set.get(a).map(|ac| ac.uuid().to_string()).unwrap();
        assert_eq!(set.find_by_profile(&uuid), Some(a));
        set.set_state(a, ActiveConnectionState::Deactivating);
        assert_eq!(set.find_by_profile(&uuid), Some(a));
        set.set_state(a, ActiveConnectionState::Deactivated);
        assert_eq!(set.find_by_profile(&uuid), None);
    }

    #[test]
    fn remove_reports_export() {
        let mut set = ActiveConnectionSet::default();
        let a = ac(&mut set, "a");
        let b = ac(&mut set, "b");
        set.get_mut(b).unwrap().exported = true;
        assert!(!set.remove(a));
        assert!(set.remove(b));
        assert!(!set.remove(b));
        assert_eq!(set.iter().count(), 0);
    }

    #[test]
    fn identifiers_are_unique() {
        let mut set = ActiveConnectionSet::default();
        let a = ac(&mut set, "a");
        let dup = ActiveConnection::new(
            a,
            ConnectionProfile::new("dup", ConnectionType::Ethernet),
            None,
            Subject::Internal,
        );
        assert!(!set.add(dup));
        assert_ne!(set.allocate_id(), a);
    }

    #[test]
    fn primary_follows_default_route() {
        let mut set = ActiveConnectionSet::default();
        let a = ac(&mut set, "a");
        let b = ac(&mut set, "b");
        set.set_state(a, ActiveConnectionState::Activating);
        assert_eq!(set.recompute_policy(), (false, true));
        assert_eq!(set.activating(), Some(a));

        set.set_state(b, ActiveConnectionState::Activated);
        set.get_mut(b).unwrap().default6 = true;
        assert_eq!(set.recompute_policy(), (true, false));
        assert_eq!(set.primary(), Some(b));

        set.set_state(a, ActiveConnectionState::Activated);
        set.get_mut(a).unwrap().default4 = true;
        assert_eq!(set.recompute_policy(), (true, true));
        assert_eq!(set.primary(), Some(a));
        assert_eq!(set.activating(), None);
        assert_eq!(set.recompute_policy(), (false, false));
    }
}
