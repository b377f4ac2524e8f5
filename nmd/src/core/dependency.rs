//! Master and parent resolution.
//!
//! A slave profile names its master by interface name or by UUID. The
//! master may already run on a device, may exist only as a stored profile,
//! or may be a virtual interface some other profile would create. Resolution
//! always re-reads the registries, so it sees the world as it is after every
//! suspension.

use log::debug;

use super::active_connection::ActiveConnection;
use super::manager::Manager;
use crate::Result;
use crate::api::models::{
    ActiveConnectionId, ActiveConnectionState, DeviceId, DeviceState, ManagerError, Subject,
};
use crate::api::profile::{ConnectionProfile, ConnectionType, is_uuid};
use crate::types::constants::limits::MAX_MASTER_DEPTH;
use crate::util::utils::{hw_addr_eq, infiniband_iface_name, vlan_iface_name};

/// Outcome of looking up the master of a profile.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MasterResolution {
    NoMaster,
    Found {
        connection: Option<ConnectionProfile>,
        device: Option<DeviceId>,
        active: Option<ActiveConnectionId>,
    },
}

fn is_hw_address(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn dependency_failed(error: ManagerError, master: &ConnectionProfile) -> ManagerError {
    match error {
        ManagerError::DependencyFailed(_) => error,
        other => ManagerError::DependencyFailed(format!("master connection {master} failed: {other}")),
    }
}

impl Manager {
    /// Finds the master of `profile` when activated on `device`.
    ///
    /// A device is never its own master, and a profile is never its own
    /// master connection.
    pub(crate) fn find_master(
        &self,
        profile: &ConnectionProfile,
        device: DeviceId,
    ) -> Result<MasterResolution> {
        let Some(master) = profile.master.as_deref() else {
            return Ok(MasterResolution::NoMaster);
        };

        if let Some(master_dev) = self.devices.by_master(master, None) {
            if master_dev == device {
                return Err(ManagerError::DependencyFailed(
                    "Device cannot be its own master".into(),
                ));
            }
            let running = self
                .devices
                .get(master_dev)
                .and_then(|d| d.act_request)
                .and_then(|id| self.acs.get(id));
            if let Some(running) = running
                && !running.profile.accepts_slave(profile)
            {
                return Err(ManagerError::DependencyFailed(format!(
                    "master device {master} runs {} which cannot take {profile} as a slave",
                    running.profile
                )));
            }
            return Ok(MasterResolution::Found {
                connection: running.map(|r| r.profile.clone()),
                device: Some(master_dev),
                active: running.map(|r| r.id),
            });
        }

        if let Some(master_profile) = self.store.connection_by_uuid(master) {
            if master_profile.uuid == profile.uuid {
                return Err(ManagerError::DependencyFailed(
                    "Connection cannot be its own master".into(),
                ));
            }
            let active = self.acs.find_by_profile(master);
            let master_dev = active.and_then(|id| self.acs.get(id)).and_then(|ac| ac.device);
            if master_dev == Some(device) {
                return Err(ManagerError::DependencyFailed(
                    "Device cannot be its own master".into(),
                ));
            }
            return Ok(MasterResolution::Found {
                connection: Some(master_profile),
                device: master_dev,
                active,
            });
        }

        let candidates: Vec<ConnectionProfile> = self
            .activatable_connections()
            .into_iter()
            .filter(|c| {
                c.uuid != profile.uuid
                    && c.accepts_slave(profile)
                    && self.predicted_virtual_iface(c).as_deref() == Some(master)
            })
            .collect();
        match candidates.as_slice() {
            [] => Err(ManagerError::DependencyFailed(format!(
                "Master connection not found or invalid: {master}"
            ))),
            [only] => Ok(MasterResolution::Found {
                connection: Some(only.clone()),
                device: None,
                active: None,
            }),
            [first, second, ..] => Err(ManagerError::DependencyFailed(format!(
                "master '{master}' is ambiguous: both {first} and {second} would create it"
            ))),
        }
    }

    /// Makes sure the resolved master has an active connection that is at
    /// least queued, activating it when needed.
    pub(crate) fn ensure_master_active(
        &mut self,
        master: MasterResolution,
        slave: &ConnectionProfile,
        subject: &Subject,
        chain: &mut Vec<String>,
    ) -> Result<Option<ActiveConnectionId>> {
        let MasterResolution::Found {
            connection,
            device,
            active,
        } = master
        else {
            return Ok(None);
        };

        if let Some(dev_id) = device {
            let dev = self.devices.get(dev_id).ok_or_else(|| {
                ManagerError::DependencyFailed(format!("master device {dev_id} disappeared"))
            })?;
            let iface = dev.interface().to_string();
            let state = dev.state();
            let reusable = [dev.act_request, dev.queued_request]
                .into_iter()
                .flatten()
                .find(|id| {
                    self.acs.get(*id).is_some_and(|ac| {
                        ac.state < ActiveConnectionState::Deactivating
                            && ac.profile.accepts_slave(slave)
                            && connection.as_ref().is_none_or(|c| c.uuid == ac.uuid())
                    })
                });
            if let Some(id) = reusable {
                debug!("({iface}): reusing master connection {id} for {slave}");
                return Ok(Some(id));
            }

            if state == DeviceState::Disconnected && dev.is_managed() {
                let profile = match connection {
                    Some(profile) => profile,
                    None => self
                        .activatable_connections()
                        .into_iter()
                        .find(|c| {
                            c.accepts_slave(slave)
                                && dev.check_compatible(c, |p| self.vlan_parent_device(p))
                        })
                        .ok_or_else(|| {
                            ManagerError::DependencyFailed(format!(
                                "no connection for master device {iface} accepts {slave}"
                            ))
                        })?,
                };
                return self
                    .activate_master(profile, Some(dev_id), subject, chain)
                    .map(Some);
            }
            return Err(ManagerError::DependencyFailed(format!(
                "master device {iface} is {state} and cannot be activated"
            )));
        }

        let Some(profile) = connection else {
            return Err(ManagerError::DependencyFailed(format!(
                "master of {slave} not found"
            )));
        };
        if let Some(id) = active.or_else(|| self.acs.find_by_profile(&profile.uuid)) {
            debug!("master connection {profile} is already active as {id}");
            return Ok(Some(id));
        }

        let host = self
            .devices
            .iter()
            .find(|d| {
                d.state() == DeviceState::Disconnected
                    && d.is_managed()
                    && d.act_request.is_none()
                    && d.queued_request.is_none()
                    && d.check_compatible(&profile, |p| self.vlan_parent_device(p))
            })
            .map(|d| d.id());
        if let Some(host) = host {
            return self.activate_master(profile, Some(host), subject, chain).map(Some);
        }
        if profile.needs_virtual_device() {
            return self.activate_master(profile, None, subject, chain).map(Some);
        }
        Err(ManagerError::DependencyFailed(format!(
            "no device available for master connection {profile}"
        )))
    }

    /// Activates a master on behalf of a slave. `chain` holds the UUIDs of
    /// the profiles already being resolved above this one.
    fn activate_master(
        &mut self,
        profile: ConnectionProfile,
        device: Option<DeviceId>,
        subject: &Subject,
        chain: &mut Vec<String>,
    ) -> Result<ActiveConnectionId> {
        if chain.iter().any(|uuid| *uuid == profile.uuid) {
            return Err(ManagerError::DependencyFailed(format!(
                "master dependency cycle through {profile}"
            )));
        }
        if chain.len() >= MAX_MASTER_DEPTH {
            return Err(ManagerError::DependencyFailed(format!(
                "master dependency cycle: more than {MAX_MASTER_DEPTH} levels below {profile}"
            )));
        }

        debug!("activating master connection {profile}");
        let name = profile.clone();
        chain.push(profile.uuid.clone());
        let ac = ActiveConnection::new(self.acs.allocate_id(), profile, device, subject.clone());
        let result = self.internal_activate_generic(ac, chain);
        chain.pop();
        result.map_err(|e| dependency_failed(e, &name))
    }

    /// Interface name activating a virtual profile would create.
    pub(crate) fn predicted_virtual_iface(&self, profile: &ConnectionProfile) -> Option<String> {
        match profile.connection_type {
            ConnectionType::Bond | ConnectionType::Bridge | ConnectionType::Team => {
                profile.interface_name.clone()
            }
            ConnectionType::Vlan => profile.interface_name.clone().or_else(|| {
                let parent = self.parent_iface_name(profile)?;
                Some(vlan_iface_name(&parent, profile.vlan_id?))
            }),
            ConnectionType::Infiniband => {
                let p_key = profile.p_key?;
                let parent = self.parent_iface_name(profile)?;
                Some(infiniband_iface_name(&parent, p_key))
            }
            _ => None,
        }
    }

    fn parent_iface_name(&self, profile: &ConnectionProfile) -> Option<String> {
        if let Some(dev) = self.vlan_parent_device(profile).and_then(|id| self.devices.get(id)) {
            return Some(dev.interface().to_string());
        }
        profile
            .parent
            .as_ref()
            .filter(|p| !is_uuid(p) && !is_hw_address(p))
            .cloned()
    }

    /// Lower device of a VLAN or partition profile: by interface name, by
    /// the device running the parent profile, or by MAC address.
    pub(crate) fn vlan_parent_device(&self, profile: &ConnectionProfile) -> Option<DeviceId> {
        if let Some(parent) = &profile.parent {
            if let Some(id) = self.devices.by_iface(parent) {
                return Some(id);
            }
            if is_uuid(parent) {
                return self
                    .acs
                    .find_by_profile(parent)
                    .and_then(|id| self.acs.get(id))
                    .and_then(|ac| ac.device);
            }
        }
        let mac = profile.mac_address.as_deref()?;
        self.devices
            .iter()
            .find(|d| d.supports_vlans() && d.hw_address().is_some_and(|hw| hw_addr_eq(hw, mac)))
            .map(|d| d.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_hardware_addresses() {
        assert!(is_hw_address("00:11:22:aa:BB:cc"));
        assert!(!is_hw_address("eth0"));
        assert!(!is_hw_address("00:11:22:33:44"));
        assert!(!is_hw_address("00:11:22:33:44:zz"));
    }

    #[test]
    fn dependency_errors_keep_their_message() {
        let master = ConnectionProfile::new("bond0", ConnectionType::Bond);
        let kept = dependency_failed(ManagerError::DependencyFailed("cycle".into()), &master);
        assert_eq!(kept, ManagerError::DependencyFailed("cycle".into()));

        let wrapped = dependency_failed(ManagerError::UnknownDevice("eth9".into()), &master);
        assert!(matches!(wrapped, ManagerError::DependencyFailed(m) if m.contains("eth9")));
    }
}
