//! The manager core.
//!
//! [`Manager`] owns every device and active connection and is the only
//! thing that mutates them. Work that has to wait (authorization,
//! connectivity checks) runs as futures in `tasks`; each one resolves to a
//! [`Completion`] that carries identifiers only, so the handler re-resolves
//! everything and notices what changed while it was waiting.
//!
//! The activation, dependency, aggregate state and sleep logic live in
//! sibling modules as further `impl Manager` blocks.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::{FutureExt, select_biased};
use futures_timer::Delay;
use log::{debug, info, warn};
use std::pin::pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};

use super::active_connection::{ActiveConnection, ActiveConnectionSet};
use super::device::{Device, GenerationContext};
use super::device_registry::DeviceRegistry;
use super::factory::{DeviceFactoryRegistry, LinkContext};
use super::matcher::{find_matching, sort_by_last_used};
use super::sleep::Radio;
use super::state::ConnectivityCache;
use super::state_file::StateFile;
use crate::Result;
use crate::api::models::{
    ActiveConnectionId, ActiveConnectionState, AuthResult, ConnectionStateReason,
    ConnectivityState, DeviceId, DeviceState, DeviceStateReason, ManagerConfig, ManagerError,
    NmState, Permission, RfkillType, Subject, UnmanagedFlags,
};
use crate::api::profile::{ConnectionProfile, unique_profile_name};
use crate::backend::{
    Authorizer, ConnectionStore, ConnectivityChecker, ManagerInput, Platform, PlatformEvent,
    PlatformLink, RfkillSource, SettingsEvent,
};
use crate::monitoring::events::{EventBus, EventStream, ManagerEvent};
use crate::types::device_type_registry::display_name_for_code;
use crate::util::utils::device_spec_matches;

/// Answer to a request that completes once the manager has processed it.
///
/// The manager must keep being driven (`settle` or `run`) for the answer to
/// arrive.
#[derive(Debug)]
pub struct Reply<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Reply<T> {
    pub(crate) fn channel() -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub(crate) fn ready(result: Result<T>) -> Self {
        let (tx, reply) = Self::channel();
        let _ = tx.send(result);
        reply
    }

    /// Returns the answer if it has arrived.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }

    /// Waits for the answer.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.unwrap_or_else(|_| Err(dropped()))
    }
}

fn dropped() -> ManagerError {
    ManagerError::Internal("request was dropped before completing".into())
}

/// An accepted activation request.
#[derive(Debug)]
pub struct ActivationHandle {
    /// Identifier the active connection will have once it is created.
    pub active_connection: ActiveConnectionId,
    /// UUID of the profile being activated.
    pub connection: String,
    /// Resolves when authorization and orchestration are done.
    pub reply: Reply<ActiveConnectionId>,
}

/// Result of a finished background task.
pub(super) enum Completion {
    Activation {
        ac: ActiveConnectionId,
        result: Result<()>,
    },
    Operation {
        op: u64,
        result: Result<()>,
    },
    Connectivity {
        generation: u64,
        state: ConnectivityState,
    },
    /// The task answered its caller itself.
    Detached,
}

/// An activation waiting for its authorization.
pub(super) struct PendingActivation {
    pub(super) ac: ActiveConnection,
    pub(super) reply: oneshot::Sender<Result<ActiveConnectionId>>,
    /// Profile to persist once authorized.
    pub(super) new_profile: Option<ConnectionProfile>,
}

/// A privileged operation waiting for its authorization.
pub(super) enum Operation {
    Deactivate {
        ac: ActiveConnectionId,
        reply: oneshot::Sender<Result<()>>,
    },
    Sleep {
        sleep: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Enable {
        enable: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Radio {
        radio: RfkillType,
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    CheckConnectivity {
        reply: oneshot::Sender<Result<ConnectivityState>>,
    },
}

impl Operation {
    fn fail(self, error: ManagerError) {
        match self {
            Self::Deactivate { reply, .. }
            | Self::Sleep { reply, .. }
            | Self::Enable { reply, .. }
            | Self::Radio { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::CheckConnectivity { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Collaborators and settings a manager is built from.
pub(crate) struct ManagerParts {
    pub(crate) store: Box<dyn ConnectionStore>,
    pub(crate) platform: Box<dyn Platform>,
    pub(crate) rfkill: Box<dyn RfkillSource>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) checker: Arc<dyn ConnectivityChecker>,
    pub(crate) factories: DeviceFactoryRegistry,
    pub(crate) config: ManagerConfig,
    pub(crate) state_file: StateFile,
}

enum LoopEvent {
    Shutdown,
    Input(Option<ManagerInput>),
    Completion(Completion),
    ConnectivityTimer,
    FirmwareTimer,
    Idle,
}

pub(crate) struct Manager {
    pub(super) devices: DeviceRegistry,
    pub(super) factories: DeviceFactoryRegistry,
    pub(super) acs: ActiveConnectionSet,
    pub(super) store: Box<dyn ConnectionStore>,
    pub(super) platform: Box<dyn Platform>,
    pub(super) rfkill: Box<dyn RfkillSource>,
    pub(super) authorizer: Arc<dyn Authorizer>,
    pub(super) checker: Arc<dyn ConnectivityChecker>,
    pub(super) events: EventBus,
    pub(super) state_file: StateFile,
    pub(super) config: ManagerConfig,
    pub(super) state: NmState,
    pub(super) sleeping: bool,
    pub(super) networking_enabled: bool,
    pub(super) radios: Vec<Radio>,
    pub(super) connectivity: ConnectivityCache,
    startup: bool,
    started: bool,
    pub(super) tasks: FuturesUnordered<BoxFuture<'static, Completion>>,
    pub(super) pending_activations: Vec<PendingActivation>,
    pending_operations: Vec<(u64, Operation)>,
    next_operation: u64,
}

impl Manager {
    pub(crate) fn new(parts: ManagerParts) -> Self {
        let persisted = *parts.state_file.state();
        let radios = RfkillType::ALL
            .iter()
            .map(|&rtype| Radio::new(rtype, persisted.radio_enabled(rtype)))
            .collect();
        Self {
            devices: DeviceRegistry::default(),
            factories: parts.factories,
            acs: ActiveConnectionSet::default(),
            store: parts.store,
            platform: parts.platform,
            rfkill: parts.rfkill,
            authorizer: parts.authorizer,
            checker: parts.checker,
            events: EventBus::default(),
            state_file: parts.state_file,
            config: parts.config,
            state: NmState::Unknown,
            sleeping: false,
            networking_enabled: persisted.networking_enabled,
            radios,
            connectivity: ConnectivityCache::default(),
            startup: true,
            started: false,
            tasks: FuturesUnordered::new(),
            pending_activations: Vec::new(),
            pending_operations: Vec::new(),
            next_operation: 1,
        }
    }

    pub(crate) fn subscribe(&mut self) -> EventStream {
        self.events.subscribe()
    }

    pub(crate) fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub(crate) fn active_connections(&self) -> &ActiveConnectionSet {
        &self.acs
    }

    pub(crate) fn startup_complete(&self) -> bool {
        !self.startup
    }

    /// Enumerates existing links and brings the manager up.
    pub(crate) fn start(&mut self) {
        info!(
            "starting (networking {})",
            if self.networking_enabled { "enabled" } else { "disabled" }
        );
        self.rfkill_update();

        let mut links = self.platform.links();
        links.sort_by_key(|l| l.parent_ifindex.is_some());
        for link in links {
            self.platform_link_added(link);
        }

        self.system_create_virtual_devices();
        self.started = true;
        self.update_state();
        self.check_if_startup_complete();
    }

    /// Removes every device, leaving assumable configuration in place.
    pub(crate) fn shutdown(&mut self) {
        info!("shutting down");
        for id in self.devices.ids() {
            self.remove_device(id, true);
        }
        for pending in self.pending_activations.drain(..) {
            let _ = pending
                .reply
                .send(Err(ManagerError::Internal("manager is shutting down".into())));
        }
        for (_, op) in self.pending_operations.drain(..) {
            op.fail(ManagerError::Internal("manager is shutting down".into()));
        }
        self.tasks.clear();
    }

    /// Processes every completion that is ready and the idle work it
    /// leaves behind, without waiting.
    pub(crate) fn settle(&mut self) {
        loop {
            let mut progressed = false;
            while let Some(Some(done)) = self.tasks.next().now_or_never() {
                self.handle_completion(done);
                progressed = true;
            }
            if self.has_idle_work() {
                self.run_idle();
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Drives the manager until `shutdown` fires.
    pub(crate) async fn run(
        &mut self,
        mut inputs: mpsc::UnboundedReceiver<ManagerInput>,
        mut shutdown: watch::Receiver<()>,
    ) {
        let mut connectivity_timer = Delay::new(self.config.connectivity_interval);
        let mut firmware_timer = Delay::new(self.config.firmware_reprobe_interval);
        let mut inputs_open = true;

        loop {
            let idle_ready = self.has_idle_work();
            let event = {
                let mut shutdown_changed = pin!(shutdown.changed().fuse());
                let mut next_input = pin!(
                    async {
                        if inputs_open {
                            inputs.recv().await
                        } else {
                            futures::future::pending().await
                        }
                    }
                    .fuse()
                );
                let mut idle = pin!(
                    async move {
                        if !idle_ready {
                            futures::future::pending::<()>().await;
                        }
                    }
                    .fuse()
                );

                select_biased! {
                    _ = shutdown_changed => LoopEvent::Shutdown,
                    input = next_input => LoopEvent::Input(input),
                    done = self.tasks.select_next_some() => LoopEvent::Completion(done),
                    _ = (&mut connectivity_timer).fuse() => LoopEvent::ConnectivityTimer,
                    _ = (&mut firmware_timer).fuse() => LoopEvent::FirmwareTimer,
                    _ = idle => LoopEvent::Idle,
                }
            };

            match event {
                LoopEvent::Shutdown => {
                    debug!("shutdown requested");
                    break;
                }
                LoopEvent::Input(Some(input)) => self.handle_input(input),
                LoopEvent::Input(None) => {
                    debug!("host input channel closed");
                    inputs_open = false;
                }
                LoopEvent::Completion(done) => self.handle_completion(done),
                LoopEvent::ConnectivityTimer => {
                    connectivity_timer.reset(self.config.connectivity_interval);
                    self.periodic_connectivity_check();
                }
                LoopEvent::FirmwareTimer => {
                    firmware_timer.reset(self.config.firmware_reprobe_interval);
                    self.reprobe_firmware();
                }
                LoopEvent::Idle => self.run_idle(),
            }
        }
    }

    pub(crate) fn handle_input(&mut self, input: ManagerInput) {
        match input {
            ManagerInput::Platform(event) => self.handle_platform_event(event),
            ManagerInput::Settings(event) => self.handle_settings_event(event),
            ManagerInput::RfkillChanged => self.rfkill_update(),
            ManagerInput::FirmwareChanged => self.reprobe_firmware(),
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Activation { ac, result } => {
                let Some(pos) = self.pending_activations.iter().position(|p| p.ac.id == ac) else {
                    debug!("authorization finished for unknown activation {ac}");
                    return;
                };
                let pending = self.pending_activations.remove(pos);
                self.activation_authorized(pending, result);
            }
            Completion::Operation { op, result } => {
                let Some(pos) = self.pending_operations.iter().position(|(id, _)| *id == op) else {
                    return;
                };
                let (_, operation) = self.pending_operations.remove(pos);
                match result {
                    Ok(()) => self.run_operation(operation),
                    Err(e) => {
                        debug!("operation refused: {e}");
                        operation.fail(e);
                    }
                }
            }
            Completion::Connectivity { generation, state } => {
                self.connectivity_checked(generation, state);
            }
            Completion::Detached => {}
        }
    }

    fn has_idle_work(&self) -> bool {
        self.acs.has_pending_cleanup()
    }

    /// Removes the active connections that reached Deactivated since the
    /// last pass.
    fn run_idle(&mut self) {
        for id in self.acs.take_deactivated() {
            debug!("active connection {id} removed");
            if self.acs.remove(id) {
                self.events.emit(ManagerEvent::ActiveConnectionRemoved(id));
            }
        }
    }

    /// Future checking that `subject` holds every permission in order.
    pub(super) fn authorization(
        &self,
        subject: Subject,
        permissions: Vec<Permission>,
    ) -> BoxFuture<'static, Result<()>> {
        let authorizer = Arc::clone(&self.authorizer);
        async move {
            for permission in permissions {
                match authorizer.authorize(&subject, permission).await {
                    Ok(AuthResult::Yes) => {}
                    Ok(result) => {
                        return Err(ManagerError::PermissionDenied(format!(
                            "{subject} is not authorized for {permission} ({result})"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Runs `op` once `subject` is authorized for `permission`.
    pub(super) fn request_operation(
        &mut self,
        subject: &Subject,
        permission: Permission,
        op: Operation,
    ) {
        if subject.is_internal() {
            self.run_operation(op);
            return;
        }
        let id = self.next_operation;
        self.next_operation += 1;
        self.pending_operations.push((id, op));
        let check = self.authorization(subject.clone(), vec![permission]);
        self.tasks.push(
            async move {
                Completion::Operation {
                    op: id,
                    result: check.await,
                }
            }
            .boxed(),
        );
    }

    fn run_operation(&mut self, op: Operation) {
        match op {
            Operation::Deactivate { ac, reply } => {
                let result = self.deactivate_by_user(ac);
                let _ = reply.send(result);
            }
            Operation::Sleep { sleep, reply } => {
                self.do_sleep(sleep);
                let _ = reply.send(Ok(()));
            }
            Operation::Enable { enable, reply } => {
                self.do_enable(enable);
                let _ = reply.send(Ok(()));
            }
            Operation::Radio {
                radio,
                enabled,
                reply,
            } => {
                self.do_set_radio_enabled(radio, enabled);
                let _ = reply.send(Ok(()));
            }
            Operation::CheckConnectivity { reply } => {
                self.connectivity.waiters.push(reply);
                self.start_connectivity_check();
            }
        }
    }

    /// Queries every permission for `subject`.
    pub(crate) fn get_permissions(&mut self, subject: &Subject) -> Reply<Vec<(Permission, AuthResult)>> {
        let (tx, reply) = Reply::channel();
        let authorizer = Arc::clone(&self.authorizer);
        let subject = subject.clone();
        self.tasks.push(
            async move {
                let mut answers = Vec::with_capacity(Permission::ALL.len());
                for permission in Permission::ALL {
                    let result = authorizer
                        .authorize(&subject, permission)
                        .await
                        .unwrap_or(AuthResult::No);
                    answers.push((permission, result));
                }
                let _ = tx.send(Ok(answers));
                Completion::Detached
            }
            .boxed(),
        );
        reply
    }

    pub(super) fn emit(&mut self, event: ManagerEvent) {
        self.events.emit(event);
    }

    // Device lifecycle

    /// Registers a device and brings it under management.
    ///
    /// With `generate` set, the device's running configuration is matched
    /// against the stored profiles and assumed.
    pub(crate) fn add_device(&mut self, device: Device, generate: bool) -> Option<DeviceId> {
        let iface = device.interface().to_string();
        if self.devices.by_udi(device.udi()).is_some()
            || device
                .ifindex()
                .is_some_and(|ifindex| self.devices.by_ifindex(ifindex).is_some())
        {
            debug!("({iface}): already known, not adding");
            return None;
        }

        if device.ip_interface() != device.interface() {
            let owned: Vec<DeviceId> = self
                .devices
                .iter()
                .filter(|d| d.ip_interface() == device.ip_interface())
                .map(|d| d.id())
                .collect();
            for id in owned {
                debug!(
                    "({}): interface is owned by {iface}, removing",
                    device.ip_interface()
                );
                self.remove_device(id, false);
            }
        }

        let id = match self.devices.add(device) {
            Ok(id) => id,
            Err(e) => {
                warn!("({iface}): {e}");
                return None;
            }
        };
        self.emit(ManagerEvent::DeviceAdded(id));

        let dev = self.devices.get(id)?;
        info!(
            "({iface}): new {} device (driver: '{}' ifindex: {})",
            display_name_for_code(dev.kind().type_code()),
            dev.driver().unwrap_or("unknown"),
            dev.ifindex().unwrap_or(0)
        );
        let software = dev.is_software();
        let nm_owned = dev.nm_owned;
        let rfkill = dev.rfkill_type();
        let user_unmanaged = self
            .config
            .unmanaged_specs
            .iter()
            .any(|spec| device_spec_matches(spec, dev.interface(), dev.hw_address()));
        let sleeping = self.manager_sleeping();

        let radio_on = rfkill.map(|rtype| self.radio_effective(rtype));
        if let Some(dev) = self.devices.get_mut(id) {
            if let Some(enabled) = radio_on {
                dev.radio_enabled = enabled;
            }
            dev.unmanaged.set(UnmanagedFlags::USER, user_unmanaged);
            dev.unmanaged
                .set(UnmanagedFlags::INTERNAL, sleeping && !software);
        }

        let connection = if generate && !user_unmanaged && !sleeping {
            self.get_existing_connection(id)
        } else {
            None
        };
        if software
            && !nm_owned
            && connection.is_none()
            && let Some(dev) = self.devices.get_mut(id)
        {
            dev.unmanaged.insert(UnmanagedFlags::DEFAULT);
        }

        let managed = self.devices.get(id).is_some_and(|d| d.is_managed());
        if managed {
            if connection.is_some() {
                self.set_device_state(id, DeviceState::Unavailable, DeviceStateReason::ConnectionAssumed);
                self.set_device_state(id, DeviceState::Disconnected, DeviceStateReason::ConnectionAssumed);
            } else {
                self.set_device_state(id, DeviceState::Unavailable, DeviceStateReason::NowManaged);
                self.check_available(id, DeviceStateReason::None);
            }
        }

        self.system_create_virtual_devices();

        if managed && let Some(profile) = connection {
            self.assume_connection(id, profile);
        }
        self.check_if_startup_complete();
        Some(id)
    }

    /// Takes a device out of the registry.
    ///
    /// When quitting, a device running an assumable connection is left
    /// configured so the next start can adopt it again.
    pub(crate) fn remove_device(&mut self, id: DeviceId, quitting: bool) {
        let Some(dev) = self.devices.get(id) else {
            return;
        };
        let iface = dev.interface().to_string();
        let keep = quitting && dev.can_assume_connections() && dev.act_request.is_some();

        if keep {
            info!("({iface}): leaving configuration in place");
        } else {
            self.set_unmanaged(id, UnmanagedFlags::INTERNAL, true, DeviceStateReason::Removed);
            if quitting
                && let Some(dev) = self.devices.get(id)
                && dev.nm_owned
                && dev.is_software()
                && let Some(ifindex) = dev.ifindex()
            {
                match self.platform.delete_link(ifindex) {
                    Ok(()) => debug!("({iface}): deleted software link"),
                    Err(e) => warn!("({iface}): failed to delete software link: {e}"),
                }
            }
        }

        if let Some(dev) = self.devices.get_mut(id) {
            dev.act_request = None;
            dev.queued_request = None;
        }
        let bound: Vec<ActiveConnectionId> = self
            .acs
            .iter()
            .filter(|ac| ac.device == Some(id) && ac.state < ActiveConnectionState::Deactivated)
            .map(|ac| ac.id)
            .collect();
        for ac in bound {
            self.finish_active_connection(ac, ConnectionStateReason::DeviceRemoved);
        }

        self.devices.remove(id);
        self.emit(ManagerEvent::DeviceRemoved(id));
        debug!("({iface}): removed");

        self.update_policy();
        self.update_state();
        self.check_if_startup_complete();
    }

    /// Sets or clears one unmanaged reason and moves the device accordingly.
    pub(super) fn set_unmanaged(
        &mut self,
        id: DeviceId,
        flag: UnmanagedFlags,
        value: bool,
        reason: DeviceStateReason,
    ) {
        let Some(dev) = self.devices.get_mut(id) else {
            return;
        };
        let was_managed = dev.is_managed();
        dev.unmanaged.set(flag, value);
        let managed = dev.is_managed();

        if was_managed && !managed {
            self.set_device_state(id, DeviceState::Unmanaged, reason);
        } else if !was_managed && managed {
            self.set_device_state(id, DeviceState::Unavailable, reason);
            self.check_available(id, DeviceStateReason::None);
        }
    }

    /// Moves a device between Unavailable and Disconnected as its
    /// availability dictates.
    pub(super) fn check_available(&mut self, id: DeviceId, reason: DeviceStateReason) {
        let Some(dev) = self.devices.get(id) else {
            return;
        };
        match dev.state() {
            DeviceState::Unavailable if dev.is_managed() && dev.is_available(false) => {
                self.set_device_state(id, DeviceState::Disconnected, reason);
            }
            DeviceState::Disconnected if !dev.is_available(false) => {
                let reason = if dev.firmware_missing() {
                    DeviceStateReason::FirmwareMissing
                } else {
                    reason
                };
                self.set_device_state(id, DeviceState::Unavailable, reason);
            }
            _ => {}
        }
    }

    /// Applies a device state transition and everything that follows from
    /// it: the bound active connection mirrors it, a failure falls through
    /// to Disconnected, and Disconnected starts the queued request.
    pub(super) fn set_device_state(
        &mut self,
        id: DeviceId,
        new: DeviceState,
        reason: DeviceStateReason,
    ) {
        let Some(dev) = self.devices.get_mut(id) else {
            return;
        };
        let old = dev.state;
        if old == new {
            return;
        }
        dev.state = new;
        let act_request = dev.act_request;
        let queued = dev.queued_request;
        info!(
            "({}): device state change: {old} -> {new} (reason '{reason}')",
            dev.interface()
        );
        if new.active_connection_state() == ActiveConnectionState::Deactivated {
            dev.act_request = None;
        }
        if new <= DeviceState::Unavailable {
            dev.queued_request = None;
        }
        self.emit(ManagerEvent::DeviceStateChanged {
            device: id,
            new,
            old,
            reason,
        });

        if let Some(ac) = act_request {
            match new.active_connection_state() {
                ActiveConnectionState::Deactivated => {
                    self.finish_active_connection(ac, reason.into());
                }
                state => self.set_ac_state(ac, state, reason.into()),
            }
        }
        if new <= DeviceState::Unavailable
            && let Some(ac) = queued
        {
            self.finish_active_connection(ac, reason.into());
        }

        match new {
            DeviceState::Failed => {
                self.set_device_state(id, DeviceState::Disconnected, reason);
            }
            DeviceState::Disconnected => self.try_start_queued(id),
            _ => {}
        }
        self.update_policy();
        self.update_state();
    }

    /// Moves an active connection forward and reacts to the new state.
    pub(super) fn set_ac_state(
        &mut self,
        id: ActiveConnectionId,
        state: ActiveConnectionState,
        reason: ConnectionStateReason,
    ) {
        let Some(old) = self.acs.set_state(id, state) else {
            return;
        };
        let Some(ac) = self.acs.get(id) else {
            return;
        };
        debug!("active connection {id} for {}: {old} -> {state} ({reason})", ac.profile);
        let exported = ac.exported;
        let uuid = ac.uuid().to_string();
        if exported {
            self.emit(ManagerEvent::ActiveConnectionStateChanged {
                active_connection: id,
                state,
                reason,
            });
        }

        match state {
            ActiveConnectionState::Activating => {
                let waiting: Vec<DeviceId> = self
                    .devices
                    .iter()
                    .filter(|d| {
                        d.queued_request
                            .and_then(|q| self.acs.get(q))
                            .is_some_and(|q| q.master == Some(id))
                    })
                    .map(|d| d.id())
                    .collect();
                for dev in waiting {
                    self.try_start_queued(dev);
                }
            }
            ActiveConnectionState::Activated => {
                if let Err(e) = self.store.set_timestamp(&uuid, now_secs()) {
                    debug!("failed to record activation time of {uuid}: {e}");
                }
            }
            ActiveConnectionState::Deactivated => {
                for dependent in self.acs.dependents_of(id) {
                    self.deactivate_internal(dependent, DeviceStateReason::DependencyFailed);
                }
                for vpn in self.acs.vpns_on(id) {
                    self.deactivate_internal(vpn, DeviceStateReason::DependencyFailed);
                }
                for dev in self.devices.iter_mut() {
                    if dev.queued_request == Some(id) {
                        dev.queued_request = None;
                    }
                    if dev.act_request == Some(id) {
                        dev.act_request = None;
                    }
                }
            }
            _ => {}
        }
        self.update_policy();
        self.update_state();
    }

    /// Walks an active connection through Deactivating to Deactivated.
    pub(super) fn finish_active_connection(
        &mut self,
        id: ActiveConnectionId,
        reason: ConnectionStateReason,
    ) {
        self.set_ac_state(id, ActiveConnectionState::Deactivating, reason);
        self.set_ac_state(id, ActiveConnectionState::Deactivated, reason);
    }

    pub(super) fn update_policy(&mut self) {
        let (primary_changed, activating_changed) = self.acs.recompute_policy();
        if primary_changed {
            let primary = self.acs.primary();
            debug!("primary connection is now {primary:?}");
            self.emit(ManagerEvent::PrimaryConnectionChanged(primary));
        }
        if activating_changed {
            self.emit(ManagerEvent::ActivatingConnectionChanged(self.acs.activating()));
        }
    }

    pub(crate) fn device_state_changed(
        &mut self,
        id: DeviceId,
        state: DeviceState,
        reason: DeviceStateReason,
    ) -> Result<()> {
        if self.devices.get(id).is_none() {
            return Err(ManagerError::UnknownDevice(format!("device {id} not found")));
        }
        self.set_device_state(id, state, reason);
        Ok(())
    }

    pub(crate) fn set_default_route(
        &mut self,
        id: ActiveConnectionId,
        default4: bool,
        default6: bool,
    ) -> Result<()> {
        let Some(ac) = self.acs.get_mut(id) else {
            return Err(ManagerError::ConnectionNotActive(format!("{id} not found")));
        };
        ac.default4 = default4;
        ac.default6 = default6;
        self.update_policy();
        self.update_state();
        Ok(())
    }

    pub(crate) fn add_pending_action(&mut self, id: DeviceId, action: &str) -> Result<()> {
        let dev = self
            .devices
            .get_mut(id)
            .ok_or_else(|| ManagerError::UnknownDevice(format!("device {id} not found")))?;
        if dev.add_pending_action(action) {
            debug!("({}): add pending action '{action}'", dev.interface());
        }
        Ok(())
    }

    pub(crate) fn remove_pending_action(&mut self, id: DeviceId, action: &str) -> Result<()> {
        let dev = self
            .devices
            .get_mut(id)
            .ok_or_else(|| ManagerError::UnknownDevice(format!("device {id} not found")))?;
        if dev.remove_pending_action(action) {
            debug!("({}): remove pending action '{action}'", dev.interface());
            self.check_if_startup_complete();
        }
        Ok(())
    }

    fn check_if_startup_complete(&mut self) {
        if !self.startup || !self.started {
            return;
        }
        if let Some(dev) = self
            .devices
            .iter()
            .find(|d| d.is_managed() && !d.pending_actions.is_empty())
        {
            debug!(
                "startup complete is waiting for device '{}' ({})",
                dev.interface(),
                dev.pending_actions.join(", ")
            );
            return;
        }
        self.startup = false;
        info!("startup complete");
        self.emit(ManagerEvent::StartupComplete);
    }

    pub(crate) fn set_unmanaged_specs(&mut self, specs: Vec<String>) {
        self.config.unmanaged_specs = specs;
        for id in self.devices.ids() {
            let Some(dev) = self.devices.get(id) else {
                continue;
            };
            let matches = self
                .config
                .unmanaged_specs
                .iter()
                .any(|spec| device_spec_matches(spec, dev.interface(), dev.hw_address()));
            let reason = if matches {
                DeviceStateReason::NowUnmanaged
            } else {
                DeviceStateReason::NowManaged
            };
            self.set_unmanaged(id, UnmanagedFlags::USER, matches, reason);
        }
    }

    // Host events

    pub(crate) fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::LinkAdded(link) => self.platform_link_added(link),
            PlatformEvent::LinkChanged(link) => self.platform_link_changed(link),
            PlatformEvent::LinkRemoved { ifindex } => {
                if let Some(id) = self.devices.by_ifindex(ifindex) {
                    self.remove_device(id, false);
                }
            }
        }
    }

    fn platform_link_added(&mut self, link: PlatformLink) {
        if self.devices.by_ifindex(link.ifindex).is_some() {
            self.platform_link_changed(link);
            return;
        }
        if let Some(id) = self.devices.unrealized_by_iface(&link.name) {
            debug!("({}): realized with ifindex {}", link.name, link.ifindex);
            if let Some(dev) = self.devices.get_mut(id) {
                dev.realize(&link);
            }
            self.check_available(id, DeviceStateReason::None);
            return;
        }

        let ctx = LinkContext {
            parent: link
                .parent_ifindex
                .and_then(|ifindex| self.devices.by_ifindex(ifindex)),
        };
        match self.factories.create_for_link(&link, &ctx) {
            Ok(Some(device)) => {
                self.add_device(device, true);
            }
            Ok(None) => debug!("({}): ignoring link", link.name),
            Err(e) => warn!("{e}"),
        }
    }

    fn platform_link_changed(&mut self, link: PlatformLink) {
        let Some(id) = self.devices.by_ifindex(link.ifindex) else {
            debug!("({}): change for unknown link {}", link.name, link.ifindex);
            return;
        };
        let Some(dev) = self.devices.get_mut(id) else {
            return;
        };
        if dev.apply_link(&link) {
            debug!(
                "({}): carrier is {}",
                dev.interface(),
                if dev.carrier() { "ON" } else { "OFF" }
            );
        }
        self.check_available(id, DeviceStateReason::Carrier);
        self.recheck_assume(id);
    }

    pub(crate) fn handle_settings_event(&mut self, event: SettingsEvent) {
        match event {
            SettingsEvent::Removed(uuid) => {
                if let Some(pos) = self
                    .pending_activations
                    .iter()
                    .position(|p| p.ac.uuid() == uuid)
                {
                    let pending = self.pending_activations.remove(pos);
                    let _ = pending.reply.send(Err(ManagerError::UnknownConnection(format!(
                        "connection {uuid} was removed"
                    ))));
                }
                if let Some(ac) = self.acs.find_by_profile(&uuid) {
                    info!("connection {uuid} removed, deactivating {ac}");
                    self.deactivate_internal(ac, DeviceStateReason::ConnectionRemoved);
                }
            }
            SettingsEvent::Added(uuid) | SettingsEvent::Updated(uuid) => {
                if let Some(profile) = self.store.connection_by_uuid(&uuid)
                    && profile.needs_virtual_device()
                    && profile.autoconnect
                {
                    self.ensure_virtual_device(&profile);
                }
            }
        }
    }

    // Connection assumption

    /// Profile describing what runs on the device: a stored profile that
    /// matches, else the generated one (persisted if possible).
    pub(super) fn get_existing_connection(&mut self, id: DeviceId) -> Option<ConnectionProfile> {
        let dev = self.devices.get(id)?;
        if !dev.can_assume_connections() {
            return None;
        }
        let iface = dev.interface().to_string();
        let master_type = dev.live_config().master.as_ref().and_then(|master| {
            let master_dev = self.devices.get(self.devices.by_iface(master)?)?;
            master_dev
                .act_request
                .and_then(|ac| self.acs.get(ac))
                .map(|ac| ac.profile.connection_type)
                .or_else(|| master_dev.kind().connection_type())
        });
        let parent_iface = dev
            .kind()
            .parent()
            .and_then(|p| self.devices.get(p))
            .map(|p| p.interface().to_string());
        let ctx = GenerationContext {
            master_type,
            parent_iface,
        };
        let candidate = dev.generate_candidate(&ctx)?;

        let mut activatable = self.activatable_connections();
        sort_by_last_used(&mut activatable);
        let found = find_matching(&candidate, &activatable, dev.carrier(), |p| {
            dev.check_compatible(p, |p| self.vlan_parent_device(p))
        })
        .cloned();
        if let Some(profile) = found {
            debug!("({iface}): found matching connection {profile}");
            return Some(profile);
        }

        let mut candidate = candidate;
        let existing = self.store.connections();
        if existing.iter().any(|c| c.id == candidate.id) {
            candidate.id = unique_profile_name(&candidate.id, &existing);
        }
        debug!("({iface}): generated connection {candidate}");
        if let Err(e) = self.store.add_connection(candidate.clone()) {
            warn!("({iface}): couldn't save generated connection {candidate}: {e}");
        }
        Some(candidate)
    }

    /// Stored profiles without a live active connection, in storage order.
    pub(super) fn activatable_connections(&self) -> Vec<ConnectionProfile> {
        self.store
            .connections()
            .into_iter()
            .filter(|c| self.acs.find_by_profile(&c.uuid).is_none())
            .collect()
    }

    pub(super) fn assume_connection(&mut self, id: DeviceId, profile: ConnectionProfile) {
        let Some(dev) = self.devices.get(id) else {
            return;
        };
        let iface = dev.interface().to_string();
        let (default4, default6) = (dev.live_config().default4, dev.live_config().default6);

        let mut ac = ActiveConnection::new(self.acs.allocate_id(), profile, Some(id), Subject::Internal);
        ac.assumed = true;
        ac.default4 = default4;
        ac.default6 = default6;
        let name = ac.profile.to_string();
        let mut chain = vec![ac.uuid().to_string()];
        match self.internal_activate_device(ac, &mut chain) {
            Ok(ac) => debug!("({iface}): assumed connection {name} as {ac}"),
            Err(e) => warn!("({iface}): assumed connection {name} failed to activate: {e}"),
        }
    }

    /// Tries to adopt configuration that appeared on an idle device.
    fn recheck_assume(&mut self, id: DeviceId) {
        let Some(dev) = self.devices.get(id) else {
            return;
        };
        if !dev.is_managed()
            || !dev.autoconnect
            || dev.state() != DeviceState::Disconnected
            || dev.act_request.is_some()
            || dev.queued_request.is_some()
            || dev.live_config().is_empty()
            || self.manager_sleeping()
        {
            return;
        }
        if let Some(profile) = self.get_existing_connection(id) {
            self.assume_connection(id, profile);
        }
    }

    /// Re-reads devices that were missing firmware.
    pub(crate) fn reprobe_firmware(&mut self) {
        if self.manager_sleeping() {
            return;
        }
        let waiting: Vec<(DeviceId, i32)> = self
            .devices
            .iter()
            .filter(|d| d.state() == DeviceState::Unavailable && d.firmware_missing())
            .filter_map(|d| d.ifindex().map(|ifindex| (d.id(), ifindex)))
            .collect();
        for (id, ifindex) in waiting {
            let Some(link) = self.platform.link(ifindex) else {
                continue;
            };
            if let Some(dev) = self.devices.get_mut(id) {
                dev.apply_link(&link);
                if !dev.firmware_missing() {
                    info!("({}): firmware is now available", dev.interface());
                }
            }
            self.check_available(id, DeviceStateReason::FirmwareMissing);
        }
    }
}

pub(super) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
