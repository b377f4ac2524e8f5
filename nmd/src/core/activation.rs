//! Activation orchestration.
//!
//! A user request is validated synchronously, then parked in
//! `pending_activations` while its authorization runs. Only once authorized
//! does the active connection enter the set: the world is re-checked (the
//! device may be gone, the profile removed or activated elsewhere), the
//! device is found or created, the master chain is resolved, and the
//! connection is queued on its device.

use futures::FutureExt;
use log::{debug, info, warn};

use super::active_connection::ActiveConnection;
use super::device::{Device, DeviceKind};
use super::manager::{ActivationHandle, Completion, Manager, Operation, PendingActivation, Reply};
use crate::Result;
use crate::api::builders::ProfileBuilder;
use crate::api::models::{
    ActiveConnectionId, ActiveConnectionState, ConnectionStateReason, DeviceId, DeviceState,
    DeviceStateReason, ManagerError, Permission, Subject, UnmanagedFlags,
};
use crate::api::profile::{ConnectionProfile, ConnectionType, PartialProfile, unique_profile_name};
use crate::backend::{LinkType, PlatformError, SoftwareLinkRequest};
use crate::monitoring::events::ManagerEvent;

/// Whether activation may use the device: managed, or unmanaged only because
/// it is an external software device nobody asked for yet.
fn usable(dev: &Device) -> bool {
    dev.is_managed() || dev.unmanaged == UnmanagedFlags::DEFAULT
}

impl Manager {
    /// Validates a request to activate a stored profile and starts its
    /// authorization.
    pub(crate) fn activate_connection(
        &mut self,
        uuid: &str,
        device: Option<DeviceId>,
        specific_object: Option<&str>,
        subject: &Subject,
    ) -> Result<ActivationHandle> {
        let profile = self
            .store
            .connection_by_uuid(uuid)
            .ok_or_else(|| ManagerError::UnknownConnection(format!("connection {uuid} not found")))?;
        if !profile.is_visible_to(subject.user_name()) {
            return Err(ManagerError::PermissionDenied(format!(
                "{subject} may not use connection {profile}"
            )));
        }

        if profile.is_vpn() {
            let (base, base_device) = self.vpn_base(specific_object)?;
            if self.acs.find_by_profile(uuid).is_some() || self.activation_pending(uuid) {
                return Err(ManagerError::ConnectionAlreadyActive(format!(
                    "VPN connection {profile} is already active"
                )));
            }
            let mut ac = ActiveConnection::new(
                self.acs.allocate_id(),
                profile,
                Some(base_device),
                subject.clone(),
            );
            ac.base = Some(base);
            ac.specific_object = specific_object.map(str::to_string);
            return Ok(self.request_activation(ac, vec![Permission::NetworkControl], None));
        }

        let device = self.select_device(&profile, device)?;
        self.check_already_active(uuid, device)?;
        if let Some(dev) = device {
            self.check_private_takeover(dev, &profile, subject)?;
        }

        let mut ac = ActiveConnection::new(self.acs.allocate_id(), profile, device, subject.clone());
        ac.specific_object = specific_object.map(str::to_string);
        Ok(self.request_activation(ac, vec![Permission::NetworkControl], None))
    }

    /// Completes a partial profile for `device`, then activates it. The
    /// profile is only persisted once the request is authorized.
    pub(crate) fn add_and_activate_connection(
        &mut self,
        partial: PartialProfile,
        device: Option<DeviceId>,
        specific_object: Option<&str>,
        subject: &Subject,
    ) -> Result<(String, ActivationHandle)> {
        let existing = self.store.connections();

        let (profile, bound, base) = if partial.connection_type == Some(ConnectionType::Vpn) {
            let (base, base_device) = self.vpn_base(specific_object)?;
            let id = partial
                .id
                .unwrap_or_else(|| unique_profile_name("VPN connection", &existing));
            let mut profile = ProfileBuilder::new(ConnectionType::Vpn, id)
                .permissions(partial.permissions)
                .build();
            if let Some(autoconnect) = partial.autoconnect {
                profile.autoconnect = autoconnect;
            }
            (profile, Some(base_device), Some(base))
        } else {
            let id = device.ok_or_else(|| {
                ManagerError::UnknownDevice("a device is required to complete the connection".into())
            })?;
            let dev = self
                .devices
                .get(id)
                .ok_or_else(|| ManagerError::UnknownDevice(format!("device {id} not found")))?;
            if !usable(dev) {
                return Err(ManagerError::UnmanagedDevice(format!(
                    "device {} is not managed",
                    dev.interface()
                )));
            }
            let profile = dev.complete_profile(partial, &existing)?;
            self.check_private_takeover(id, &profile, subject)?;
            (profile, Some(id), None)
        };

        let modify = if profile.is_private() {
            Permission::SettingsModifyOwn
        } else {
            Permission::SettingsModifySystem
        };
        let uuid = profile.uuid.clone();
        let mut ac = ActiveConnection::new(
            self.acs.allocate_id(),
            profile.clone(),
            bound,
            subject.clone(),
        );
        ac.base = base;
        ac.specific_object = specific_object.map(str::to_string);
        debug!("completed connection {profile} for activation");
        let handle = self.request_activation(
            ac,
            vec![Permission::NetworkControl, modify],
            Some(profile),
        );
        Ok((uuid, handle))
    }

    /// Asks to deactivate a live active connection.
    pub(crate) fn deactivate_connection(
        &mut self,
        id: ActiveConnectionId,
        subject: &Subject,
    ) -> Reply<()> {
        let live = self
            .acs
            .get(id)
            .is_some_and(|ac| ac.state < ActiveConnectionState::Deactivated);
        if !live {
            return Reply::ready(Err(ManagerError::ConnectionNotActive(format!(
                "{id} is not active"
            ))));
        }
        let (reply, answer) = Reply::channel();
        self.request_operation(
            subject,
            Permission::NetworkControl,
            Operation::Deactivate { ac: id, reply },
        );
        answer
    }

    fn request_activation(
        &mut self,
        ac: ActiveConnection,
        permissions: Vec<Permission>,
        new_profile: Option<ConnectionProfile>,
    ) -> ActivationHandle {
        let id = ac.id;
        let connection = ac.uuid().to_string();
        let (reply, answer) = Reply::channel();
        let subject = ac.subject.clone();
        let pending = PendingActivation {
            ac,
            reply,
            new_profile,
        };

        if subject.is_internal() {
            self.activation_authorized(pending, Ok(()));
        } else {
            debug!("activation {id} of {connection} waiting for authorization of {subject}");
            let check = self.authorization(subject, permissions);
            self.pending_activations.push(pending);
            self.tasks.push(
                async move {
                    Completion::Activation {
                        ac: id,
                        result: check.await,
                    }
                }
                .boxed(),
            );
        }

        ActivationHandle {
            active_connection: id,
            connection,
            reply: answer,
        }
    }

    pub(super) fn activation_authorized(&mut self, pending: PendingActivation, result: Result<()>) {
        let PendingActivation {
            ac,
            reply,
            new_profile,
        } = pending;
        let id = ac.id;
        let name = ac.profile.to_string();
        let outcome = result.and_then(|()| self.continue_activation(ac, new_profile));
        if let Err(e) = &outcome {
            warn!("activation {id} of {name} failed: {e}");
        }
        let _ = reply.send(outcome);
    }

    /// Re-validates an authorized request and hands it to its device.
    fn continue_activation(
        &mut self,
        mut ac: ActiveConnection,
        new_profile: Option<ConnectionProfile>,
    ) -> Result<ActiveConnectionId> {
        if let Some(dev) = ac.device
            && self.devices.get(dev).is_none()
        {
            return Err(ManagerError::DependencyFailed(format!(
                "device {dev} disappeared while {} was being authorized",
                ac.profile
            )));
        }

        match new_profile {
            Some(profile) => {
                self.store.add_connection(profile.clone())?;
                info!("added connection {profile}");
                ac.profile = profile;
            }
            None => {
                ac.profile = self.store.connection_by_uuid(ac.uuid()).ok_or_else(|| {
                    ManagerError::UnknownConnection(format!(
                        "connection {} was removed",
                        ac.profile
                    ))
                })?;
            }
        }

        if let Some(existing) = self.acs.find_by_profile(ac.uuid()) {
            let elsewhere = self
                .acs
                .get(existing)
                .is_none_or(|e| ac.is_vpn() || ac.device.is_none() || e.device != ac.device);
            if elsewhere {
                return Err(ManagerError::ConnectionAlreadyActive(format!(
                    "connection {} became active on another device",
                    ac.profile
                )));
            }
        }

        if ac.is_vpn() {
            return self.start_vpn(ac);
        }
        let mut chain = vec![ac.uuid().to_string()];
        self.internal_activate_generic(ac, &mut chain)
    }

    fn start_vpn(&mut self, mut ac: ActiveConnection) -> Result<ActiveConnectionId> {
        let base = ac
            .base
            .and_then(|b| self.acs.get(b))
            .filter(|b| b.state == ActiveConnectionState::Activated)
            .ok_or_else(|| {
                ManagerError::ConnectionNotActive(format!(
                    "base connection of {} is no longer active",
                    ac.profile
                ))
            })?;
        ac.device = base.device;
        ac.exported = true;
        let id = ac.id;
        info!("VPN connection {} starting as {id}", ac.profile);
        if !self.acs.add(ac) {
            return Err(ManagerError::Internal(format!("{id} is already registered")));
        }
        self.emit(ManagerEvent::ActiveConnectionAdded(id));
        self.set_ac_state(id, ActiveConnectionState::Activating, ConnectionStateReason::None);
        Ok(id)
    }

    /// Activates on the bound device, creating the virtual device first when
    /// the profile needs one and none is bound.
    pub(super) fn internal_activate_generic(
        &mut self,
        mut ac: ActiveConnection,
        chain: &mut Vec<String>,
    ) -> Result<ActiveConnectionId> {
        if ac.device.is_none() {
            if !ac.profile.needs_virtual_device() {
                return Err(ManagerError::UnknownDevice(format!(
                    "no device found for connection {}",
                    ac.profile
                )));
            }
            ac.device = Some(self.find_or_create_virtual_device(&ac.profile)?);
        }
        self.internal_activate_device(ac, chain)
    }

    pub(super) fn internal_activate_device(
        &mut self,
        mut ac: ActiveConnection,
        chain: &mut Vec<String>,
    ) -> Result<ActiveConnectionId> {
        let dev_id = ac
            .device
            .ok_or_else(|| ManagerError::UnknownDevice(format!("no device for {}", ac.profile)))?;
        let dev = self
            .devices
            .get(dev_id)
            .ok_or_else(|| ManagerError::UnknownDevice(format!("device {dev_id} not found")))?;
        if dev.unmanaged == UnmanagedFlags::DEFAULT {
            self.set_unmanaged(
                dev_id,
                UnmanagedFlags::DEFAULT,
                false,
                DeviceStateReason::UserRequested,
            );
        }

        let dev = self
            .devices
            .get(dev_id)
            .ok_or_else(|| ManagerError::UnknownDevice(format!("device {dev_id} not found")))?;
        let iface = dev.interface().to_string();
        if !ac.user_requested() && !dev.autoconnect && !ac.assumed {
            return Err(ManagerError::AutoconnectNotAllowed(format!(
                "device {iface} does not allow automatic activation"
            )));
        }
        if !dev.is_managed() {
            return Err(ManagerError::UnmanagedDevice(format!("device {iface} is not managed")));
        }
        if !ac.assumed && !dev.is_available(ac.user_requested()) {
            return Err(ManagerError::UnknownDevice(format!("device {iface} is not available")));
        }
        if !dev.check_compatible(&ac.profile, |p| self.vlan_parent_device(p)) {
            return Err(ManagerError::UnsupportedConnectionType(format!(
                "connection {} is not compatible with device {iface}",
                ac.profile
            )));
        }

        if ac.profile.is_slave() {
            let master = self.find_master(&ac.profile, dev_id)?;
            ac.master = self.ensure_master_active(master, &ac.profile, &ac.subject, chain)?;
        }

        if let Some(dev) = self.devices.get_mut(dev_id)
            && ac.user_requested()
        {
            dev.autoconnect = true;
        }
        ac.exported = true;
        let id = ac.id;
        debug!("({iface}): activation of {} registered as {id}", ac.profile);
        if !self.acs.add(ac) {
            return Err(ManagerError::Internal(format!("{id} is already registered")));
        }
        self.emit(ManagerEvent::ActiveConnectionAdded(id));
        self.queue_activation(dev_id, id);
        Ok(id)
    }

    /// Makes `id` the next request of the device, replacing any request
    /// that was already waiting and taking down the current one.
    fn queue_activation(&mut self, dev_id: DeviceId, id: ActiveConnectionId) {
        let Some(dev) = self.devices.get_mut(dev_id) else {
            return;
        };
        let replaced = dev.queued_request.replace(id).filter(|old| *old != id);
        let current = dev.act_request;
        if let Some(old) = replaced {
            self.finish_active_connection(old, DeviceStateReason::NewActivation.into());
        }
        match current {
            Some(current) if current != id => {
                self.set_device_state(dev_id, DeviceState::Deactivating, DeviceStateReason::NewActivation);
                self.set_device_state(dev_id, DeviceState::Disconnected, DeviceStateReason::NewActivation);
            }
            _ => self.try_start_queued(dev_id),
        }
    }

    /// Starts the queued request of a disconnected device once its master
    /// is at least activating.
    pub(super) fn try_start_queued(&mut self, dev_id: DeviceId) {
        let Some(dev) = self.devices.get(dev_id) else {
            return;
        };
        if dev.state() != DeviceState::Disconnected {
            return;
        }
        let Some(queued) = dev.queued_request else {
            return;
        };
        let iface = dev.interface().to_string();
        let Some(ac) = self.acs.get(queued) else {
            if let Some(dev) = self.devices.get_mut(dev_id) {
                dev.queued_request = None;
            }
            return;
        };
        let assumed = ac.assumed;

        if let Some(master) = ac.master {
            match self.acs.get(master).map(|m| m.state) {
                Some(ActiveConnectionState::Unknown) => {
                    debug!("({iface}): {queued} waits for master {master}");
                    return;
                }
                Some(state) if state < ActiveConnectionState::Deactivating => {}
                _ => {
                    debug!("({iface}): master {master} of {queued} went away");
                    if let Some(dev) = self.devices.get_mut(dev_id) {
                        dev.queued_request = None;
                    }
                    self.finish_active_connection(queued, ConnectionStateReason::DependencyFailed);
                    return;
                }
            }
        }

        if let Some(dev) = self.devices.get_mut(dev_id) {
            dev.queued_request = None;
            dev.act_request = Some(queued);
        }
        if assumed {
            self.set_device_state(dev_id, DeviceState::Activated, DeviceStateReason::ConnectionAssumed);
        } else {
            self.set_device_state(dev_id, DeviceState::Prepare, DeviceStateReason::None);
        }
    }

    /// Tears down an active connection through its device.
    pub(super) fn deactivate_internal(&mut self, id: ActiveConnectionId, reason: DeviceStateReason) {
        let Some(ac) = self.acs.get(id) else {
            return;
        };
        if ac.state >= ActiveConnectionState::Deactivated {
            return;
        }
        debug!("deactivating {id} ({}): {reason}", ac.profile);
        if ac.is_vpn() {
            self.finish_active_connection(id, reason.into());
            return;
        }
        let device = ac.device;
        let running = device
            .and_then(|d| self.devices.get(d))
            .is_some_and(|d| d.act_request == Some(id));
        match device {
            Some(dev) if running => {
                self.set_device_state(dev, DeviceState::Deactivating, reason);
                self.set_device_state(dev, DeviceState::Disconnected, reason);
            }
            _ => {
                if let Some(dev) = device.and_then(|d| self.devices.get_mut(d))
                    && dev.queued_request == Some(id)
                {
                    dev.queued_request = None;
                }
                self.finish_active_connection(id, reason.into());
            }
        }
    }

    pub(super) fn deactivate_by_user(&mut self, id: ActiveConnectionId) -> Result<()> {
        let ac = self
            .acs
            .get(id)
            .filter(|ac| ac.state < ActiveConnectionState::Deactivated)
            .ok_or_else(|| ManagerError::ConnectionNotActive(format!("{id} is not active")))?;
        info!("deactivating {} on request", ac.profile);
        if !ac.is_vpn()
            && let Some(dev) = ac.device.and_then(|d| self.devices.get_mut(d))
        {
            dev.autoconnect = false;
        }
        self.deactivate_internal(id, DeviceStateReason::UserRequested);
        Ok(())
    }

    /// Called by the VPN layer as the tunnel progresses.
    pub(crate) fn vpn_state_changed(
        &mut self,
        id: ActiveConnectionId,
        state: ActiveConnectionState,
        reason: ConnectionStateReason,
    ) -> Result<()> {
        let ac = self
            .acs
            .get(id)
            .ok_or_else(|| ManagerError::ConnectionNotActive(format!("{id} not found")))?;
        if !ac.is_vpn() {
            return Err(ManagerError::UnsupportedConnectionType(format!(
                "{id} is not a VPN connection"
            )));
        }
        if state == ActiveConnectionState::Deactivated {
            self.finish_active_connection(id, reason);
        } else {
            self.set_ac_state(id, state, reason);
        }
        Ok(())
    }

    fn activation_pending(&self, uuid: &str) -> bool {
        self.pending_activations.iter().any(|p| p.ac.uuid() == uuid)
    }

    /// Connection and device a VPN would tunnel over.
    fn vpn_base(&self, specific_object: Option<&str>) -> Result<(ActiveConnectionId, DeviceId)> {
        let base = match specific_object {
            Some(path) => ActiveConnectionId::from_path(path).ok_or_else(|| {
                ManagerError::UnknownConnection(format!("invalid base connection {path}"))
            })?,
            None => self.acs.primary().ok_or_else(|| {
                ManagerError::ConnectionNotActive("no primary connection to tunnel over".into())
            })?,
        };
        let ac = self
            .acs
            .get(base)
            .ok_or_else(|| ManagerError::UnknownConnection(format!("base connection {base} not found")))?;
        if ac.state != ActiveConnectionState::Activated {
            return Err(ManagerError::ConnectionNotActive(format!(
                "base connection {base} is {}",
                ac.state
            )));
        }
        let device = ac.device.ok_or_else(|| {
            ManagerError::UnknownDevice(format!("base connection {base} has no device"))
        })?;
        Ok((base, device))
    }

    /// Picks the device a non-VPN request binds to. `None` means a virtual
    /// device will be created once the request is authorized.
    fn select_device(
        &self,
        profile: &ConnectionProfile,
        requested: Option<DeviceId>,
    ) -> Result<Option<DeviceId>> {
        if let Some(id) = requested {
            let dev = self
                .devices
                .get(id)
                .ok_or_else(|| ManagerError::UnknownDevice(format!("device {id} not found")))?;
            if !usable(dev) {
                return Err(ManagerError::UnmanagedDevice(format!(
                    "device {} is not managed",
                    dev.interface()
                )));
            }
            if !dev.check_compatible(profile, |p| self.vlan_parent_device(p)) {
                return Err(ManagerError::UnsupportedConnectionType(format!(
                    "connection {profile} is not compatible with device {}",
                    dev.interface()
                )));
            }
            return Ok(Some(id));
        }

        if profile.needs_virtual_device() {
            return Ok(self.existing_virtual_device(profile));
        }

        let compatible: Vec<&Device> = self
            .devices
            .iter()
            .filter(|d| d.is_managed() && d.check_compatible(profile, |p| self.vlan_parent_device(p)))
            .collect();
        compatible
            .iter()
            .find(|d| d.act_request.is_none())
            .or_else(|| compatible.first())
            .map(|d| Some(d.id()))
            .ok_or_else(|| {
                ManagerError::UnknownDevice(format!("no compatible device found for {profile}"))
            })
    }

    fn check_already_active(&self, uuid: &str, device: Option<DeviceId>) -> Result<()> {
        let live = self
            .acs
            .find_by_profile(uuid)
            .and_then(|id| self.acs.get(id))
            .map(|ac| ac.device)
            .or_else(|| {
                self.pending_activations
                    .iter()
                    .find(|p| p.ac.uuid() == uuid)
                    .map(|p| p.ac.device)
            });
        match live {
            Some(existing) if existing != device || device.is_none() => {
                Err(ManagerError::ConnectionAlreadyActive(format!(
                    "connection {uuid} is already active on another device"
                )))
            }
            _ => Ok(()),
        }
    }

    /// A user may not take a device away from another user's private
    /// connection.
    fn check_private_takeover(
        &self,
        dev_id: DeviceId,
        profile: &ConnectionProfile,
        subject: &Subject,
    ) -> Result<()> {
        let Some(dev) = self.devices.get(dev_id) else {
            return Ok(());
        };
        let Some(current) = dev.act_request.and_then(|id| self.acs.get(id)) else {
            return Ok(());
        };
        if current.uuid() != profile.uuid
            && current.profile.is_private()
            && !current.profile.is_visible_to(subject.user_name())
        {
            return Err(ManagerError::PermissionDenied(format!(
                "device {} is in use by a private connection of another user",
                dev.interface()
            )));
        }
        Ok(())
    }

    // Virtual devices

    /// A registered device that already satisfies a virtual profile.
    pub(super) fn existing_virtual_device(&self, profile: &ConnectionProfile) -> Option<DeviceId> {
        if let Some(name) = self.predicted_virtual_iface(profile)
            && let Some(id) = self.devices.by_iface(&name)
        {
            return Some(id);
        }
        self.devices
            .iter()
            .find(|d| d.check_compatible(profile, |p| self.vlan_parent_device(p)))
            .map(|d| d.id())
    }

    fn find_or_create_virtual_device(&mut self, profile: &ConnectionProfile) -> Result<DeviceId> {
        match self.existing_virtual_device(profile) {
            Some(id) => Ok(id),
            None => self.create_virtual_device(profile),
        }
    }

    /// Asks the platform for the software link of `profile` and registers
    /// an unrealized device for it. The link-added event that follows
    /// realizes the device.
    fn create_virtual_device(&mut self, profile: &ConnectionProfile) -> Result<DeviceId> {
        let name = self.predicted_virtual_iface(profile).ok_or_else(|| {
            ManagerError::UnknownDevice(format!("cannot determine interface name for {profile}"))
        })?;

        let (kind, link_type, parent_ifindex) = match profile.connection_type {
            ConnectionType::Bond => (DeviceKind::Bond, LinkType::Bond, None),
            ConnectionType::Bridge => (DeviceKind::Bridge, LinkType::Bridge, None),
            ConnectionType::Team => (DeviceKind::Team, LinkType::Team, None),
            ConnectionType::Vlan | ConnectionType::Infiniband => {
                let parent = self.vlan_parent_device(profile).ok_or_else(|| {
                    ManagerError::UnknownDevice(format!("parent device of {profile} not found"))
                })?;
                let ifindex = self.devices.get(parent).and_then(|d| d.ifindex()).ok_or_else(|| {
                    ManagerError::UnknownDevice(format!("parent device of {profile} has no link"))
                })?;
                if profile.connection_type == ConnectionType::Vlan {
                    let vlan_id = profile.vlan_id.ok_or_else(|| {
                        ManagerError::UnknownConnection(format!("{profile} has no VLAN id"))
                    })?;
                    (
                        DeviceKind::Vlan {
                            parent: Some(parent),
                            vlan_id,
                        },
                        LinkType::Vlan,
                        Some(ifindex),
                    )
                } else {
                    (
                        DeviceKind::Infiniband {
                            parent: Some(parent),
                            p_key: profile.p_key,
                        },
                        LinkType::Infiniband,
                        Some(ifindex),
                    )
                }
            }
            other => {
                return Err(ManagerError::UnsupportedConnectionType(format!(
                    "'{other}' connections have no virtual device"
                )));
            }
        };

        let request = SoftwareLinkRequest {
            name: name.clone(),
            link_type,
            parent_ifindex,
            vlan_id: profile.vlan_id,
            p_key: profile.p_key,
        };
        match self.platform.create_software_link(&request) {
            Ok(()) => {}
            Err(PlatformError::Exists(_)) => debug!("({name}): link already exists"),
            Err(e) => {
                return Err(ManagerError::Internal(format!("failed to create {name}: {e}")));
            }
        }

        let mut device = Device::unrealized(name.clone(), kind);
        device.nm_owned = true;
        let id = self
            .add_device(device, false)
            .ok_or_else(|| ManagerError::Internal(format!("failed to register device {name}")))?;
        info!("({name}): created virtual device for {profile}");
        Ok(id)
    }

    pub(super) fn ensure_virtual_device(&mut self, profile: &ConnectionProfile) {
        if self.existing_virtual_device(profile).is_some() {
            return;
        }
        if let Err(e) = self.create_virtual_device(profile) {
            debug!("couldn't create virtual device for {profile}: {e}");
        }
    }

    /// Creates the devices of every autoconnect profile that needs one.
    pub(super) fn system_create_virtual_devices(&mut self) {
        for profile in self.store.connections() {
            if profile.autoconnect && profile.needs_virtual_device() {
                self.ensure_virtual_device(&profile);
            }
        }
    }
}
