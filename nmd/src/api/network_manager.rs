use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::Result;
use crate::api::models::{
    ActiveConnectionId, ActiveConnectionInfo, ActiveConnectionState, AuthResult,
    ConnectionStateReason, ConnectivityState, DeviceId, DeviceInfo, DeviceState,
    DeviceStateReason, ManagerConfig, ManagerError, NmState, Permission, RfkillType, Subject,
};
use crate::api::profile::PartialProfile;
use crate::backend::auth::PolicyAuthorizer;
use crate::backend::connectivity::StaticConnectivity;
use crate::backend::memory::{MemoryPlatform, MemoryStore, NoRfkill};
use crate::backend::{
    Authorizer, ConnectionStore, ConnectivityChecker, ManagerInput, Platform, PlatformEvent,
    RfkillSource, SettingsEvent,
};
use crate::core::device::Device;
use crate::core::factory::{DeviceFactory, DeviceFactoryRegistry};
use crate::core::manager::{ActivationHandle, Manager, ManagerParts, Reply};
use crate::core::state_file::StateFile;
use crate::monitoring::events::EventStream;

/// High-level interface to the network manager.
///
/// This is the main entry point for managing devices and connections. It
/// owns every device and active connection; the host environment feeds it
/// link, settings and kill switch changes, and clients call the request
/// operations below.
///
/// Requests that need authorization return a [`Reply`] or an
/// [`ActivationHandle`]. The manager has to keep being driven, either by
/// [`run`](Self::run) or by calling [`settle`](Self::settle), for those
/// answers to arrive.
///
/// # Examples
///
/// ```rust
/// use nmd::backend::memory::MemoryPlatform;
/// use nmd::backend::{LinkType, PlatformLink};
/// use nmd::NetworkManager;
///
/// let platform = MemoryPlatform::with_links([
///     PlatformLink::new(2, "eth0", LinkType::Ethernet).with_carrier(true),
/// ]);
/// let mut nm = NetworkManager::builder().platform(platform).build();
/// nm.start();
///
/// let devices = nm.list_devices();
/// assert_eq!(devices.len(), 1);
/// assert_eq!(devices[0].interface, "eth0");
/// ```
///
/// Activating a stored profile:
///
/// ```no_run
/// use nmd::backend::auth::PolicyAuthorizer;
/// use nmd::backend::memory::{MemoryPlatform, MemoryStore};
/// use nmd::backend::{LinkType, PlatformLink};
/// use nmd::builders::ProfileBuilder;
/// use nmd::{ConnectionType, NetworkManager, Subject};
///
/// # async fn example() -> nmd::Result<()> {
/// let profile = ProfileBuilder::new(ConnectionType::Ethernet, "Wired").build();
/// let uuid = profile.uuid.clone();
/// let store = MemoryStore::with_connections([profile]);
///
/// let platform = MemoryPlatform::with_links([
///     PlatformLink::new(2, "eth0", LinkType::Ethernet).with_carrier(true),
/// ]);
///
/// let mut nm = NetworkManager::builder()
///     .store(store)
///     .platform(platform)
///     .authorizer(PolicyAuthorizer::allow_all())
///     .build();
/// nm.start();
///
/// let handle = nm.activate_connection(&uuid, None, None, &Subject::user(1000, "alice"))?;
/// nm.settle();
/// let active = handle.reply.wait().await?;
/// println!("activated as {}", active.path());
/// # Ok(())
/// # }
/// ```
pub struct NetworkManager {
    inner: Manager,
}

/// Collaborators and configuration for a [`NetworkManager`].
///
/// Every collaborator has an in-memory default, which makes a bare
/// `NetworkManager::builder().build()` a manager with no links, no stored
/// profiles and an authorizer that only admits root.
pub struct NetworkManagerBuilder {
    store: Box<dyn ConnectionStore>,
    platform: Box<dyn Platform>,
    rfkill: Box<dyn RfkillSource>,
    authorizer: Arc<dyn Authorizer>,
    checker: Arc<dyn ConnectivityChecker>,
    factories: DeviceFactoryRegistry,
    config: ManagerConfig,
    state_file: StateFile,
}

impl Default for NetworkManagerBuilder {
    fn default() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            platform: Box::new(MemoryPlatform::new()),
            rfkill: Box::new(NoRfkill),
            authorizer: Arc::new(PolicyAuthorizer::deny_all()),
            checker: Arc::new(StaticConnectivity::default()),
            factories: DeviceFactoryRegistry::with_builtin(),
            config: ManagerConfig::default(),
            state_file: StateFile::in_memory(),
        }
    }
}

impl NetworkManagerBuilder {
    /// Where connection profiles are read from and persisted to.
    #[must_use]
    pub fn store(mut self, store: impl ConnectionStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Source of kernel links and sink of link operations.
    #[must_use]
    pub fn platform(mut self, platform: impl Platform + 'static) -> Self {
        self.platform = Box::new(platform);
        self
    }

    #[must_use]
    pub fn rfkill(mut self, rfkill: impl RfkillSource + 'static) -> Self {
        self.rfkill = Box::new(rfkill);
        self
    }

    /// Decides whether a subject may perform a privileged operation.
    #[must_use]
    pub fn authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Arc::new(authorizer);
        self
    }

    /// Like [`authorizer`](Self::authorizer), for an authorizer the caller
    /// keeps a handle to.
    #[must_use]
    pub fn shared_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    #[must_use]
    pub fn connectivity(mut self, checker: impl ConnectivityChecker + 'static) -> Self {
        self.checker = Arc::new(checker);
        self
    }

    /// Registers an extra device factory. Factories with a higher
    /// priority are asked first; among equal priorities the built-in ones
    /// keep precedence.
    #[must_use]
    pub fn factory(mut self, factory: impl DeviceFactory + 'static) -> Self {
        self.factories.register(Box::new(factory));
        self
    }

    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Persisted networking and radio state.
    #[must_use]
    pub fn state_file(mut self, state_file: StateFile) -> Self {
        self.state_file = state_file;
        self
    }

    pub fn build(self) -> NetworkManager {
        NetworkManager {
            inner: Manager::new(ManagerParts {
                store: self.store,
                platform: self.platform,
                rfkill: self.rfkill,
                authorizer: self.authorizer,
                checker: self.checker,
                factories: self.factories,
                config: self.config,
                state_file: self.state_file,
            }),
        }
    }
}

impl NetworkManager {
    /// Starts configuring a new manager.
    pub fn builder() -> NetworkManagerBuilder {
        NetworkManagerBuilder::default()
    }

    /// Enumerates the existing links, creates devices for them, assumes
    /// connections already configured on them, and creates the virtual
    /// devices that stored profiles ask for.
    pub fn start(&mut self) {
        self.inner.start();
    }

    /// Removes every device for shutdown.
    ///
    /// Configuration that a future instance could assume is left in place;
    /// software links the manager created and nothing else uses are
    /// deleted. Outstanding replies fail with [`ManagerError::Internal`].
    pub fn shutdown(&mut self) {
        self.inner.shutdown();
    }

    /// Processes everything that is ready without waiting.
    ///
    /// Authorization answers, connectivity results and deferred cleanup
    /// are handled in the order they become ready. Returns once nothing is
    /// left to do right now.
    pub fn settle(&mut self) {
        self.inner.settle();
    }

    /// Drives the manager until `shutdown` fires or its sender is dropped.
    ///
    /// Host inputs arrive over `inputs`. Periodic connectivity checks and
    /// firmware re-probes run from here as well.
    pub async fn run(
        &mut self,
        inputs: mpsc::UnboundedReceiver<ManagerInput>,
        shutdown: watch::Receiver<()>,
    ) {
        self.inner.run(inputs, shutdown).await;
    }

    /// Subscribes to change notifications.
    ///
    /// Events are delivered in the order the changes happened.
    pub fn subscribe(&mut self) -> EventStream {
        self.inner.subscribe()
    }

    /// Lists every device, realized or not, in registration order.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.inner.devices().iter().map(Device::info).collect()
    }

    /// Looks up a device by identifier.
    pub fn device(&self, id: DeviceId) -> Option<DeviceInfo> {
        self.inner.devices().get(id).map(Device::info)
    }

    /// Finds the device whose IP interface is `iface`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownDevice`] if no device carries IP
    /// configuration on that interface.
    pub fn get_device_by_ip_iface(&self, iface: &str) -> Result<DeviceInfo> {
        self.inner
            .devices()
            .by_ip_iface(iface)
            .and_then(|id| self.device(id))
            .ok_or_else(|| ManagerError::UnknownDevice(format!("no device found for interface {iface}")))
    }

    /// Lists the active connections that have not been cleaned up yet.
    pub fn active_connections(&self) -> Vec<ActiveConnectionInfo> {
        self.inner.active_connections().iter().map(|ac| ac.info()).collect()
    }

    pub fn active_connection(&self, id: ActiveConnectionId) -> Option<ActiveConnectionInfo> {
        self.inner.active_connections().get(id).map(|ac| ac.info())
    }

    /// The active connection that carries the default route.
    pub fn primary_connection(&self) -> Option<ActiveConnectionId> {
        self.inner.active_connections().primary()
    }

    /// The activating connection expected to take the default route.
    pub fn activating_connection(&self) -> Option<ActiveConnectionId> {
        self.inner.active_connections().activating()
    }

    /// Activates a stored connection profile.
    ///
    /// `device` may be omitted for profiles that create their own virtual
    /// interface; for VPN profiles `specific_object` names the active
    /// connection to tunnel over, or the primary connection is used.
    ///
    /// The active connection exists as soon as the request is authorized.
    /// Its identifier is in the returned handle right away and the handle's
    /// reply resolves once it has been added.
    ///
    /// # Errors
    ///
    /// Validation errors are returned immediately: an unknown profile or
    /// device, a device that cannot host the profile, a profile already
    /// active on the device, or a private profile taking over a device
    /// another user activated. Authorization and dependency failures are
    /// reported through the handle.
    pub fn activate_connection(
        &mut self,
        uuid: &str,
        device: Option<DeviceId>,
        specific_object: Option<&str>,
        subject: &Subject,
    ) -> Result<ActivationHandle> {
        self.inner
            .activate_connection(uuid, device, specific_object, subject)
    }

    /// Completes a partial profile, saves it once authorized, and
    /// activates it.
    ///
    /// Returns the UUID the completed profile will be saved under together
    /// with the activation handle.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownDevice`] when no device is given for a
    /// non-VPN profile, and the errors of
    /// [`activate_connection`](Self::activate_connection) otherwise.
    pub fn add_and_activate_connection(
        &mut self,
        partial: PartialProfile,
        device: Option<DeviceId>,
        specific_object: Option<&str>,
        subject: &Subject,
    ) -> Result<(String, ActivationHandle)> {
        self.inner
            .add_and_activate_connection(partial, device, specific_object, subject)
    }

    /// Deactivates an active connection.
    ///
    /// The device stops autoconnecting until it is woken or re-managed.
    /// The reply fails with [`ManagerError::ConnectionNotActive`] if the
    /// connection is unknown or already deactivated.
    pub fn deactivate_connection(&mut self, id: ActiveConnectionId, subject: &Subject) -> Reply<()> {
        self.inner.deactivate_connection(id, subject)
    }

    /// Puts the manager to sleep or wakes it.
    ///
    /// Sleeping unmanages every hardware device except those armed for
    /// wake-on-LAN; waking re-manages them and re-applies radio state.
    pub fn sleep(&mut self, sleep: bool, subject: &Subject) -> Reply<()> {
        self.inner.sleep(sleep, subject)
    }

    /// Enables or disables networking. The choice is persisted.
    pub fn enable(&mut self, enable: bool, subject: &Subject) -> Reply<()> {
        self.inner.enable(enable, subject)
    }

    /// Sets the user-requested state of a radio class. The choice is
    /// persisted; the radio only runs if its kill switches allow it too.
    pub fn set_radio_enabled(&mut self, radio: RfkillType, enabled: bool, subject: &Subject) -> Reply<()> {
        self.inner.set_radio_enabled(radio, enabled, subject)
    }

    /// Whether the user wants the radio class enabled.
    pub fn radio_enabled(&self, radio: RfkillType) -> bool {
        self.inner.radio_enabled(radio)
    }

    /// Whether the hardware switch allows the radio class.
    pub fn radio_hardware_enabled(&self, radio: RfkillType) -> bool {
        self.inner.radio_hardware_enabled(radio)
    }

    /// Reports the subject's authorization result for every permission.
    pub fn get_permissions(&mut self, subject: &Subject) -> Reply<Vec<(Permission, AuthResult)>> {
        self.inner.get_permissions(subject)
    }

    /// Runs a connectivity check and answers with its result.
    pub fn check_connectivity(&mut self, subject: &Subject) -> Reply<ConnectivityState> {
        self.inner.check_connectivity(subject)
    }

    /// Result of the last connectivity check.
    pub fn connectivity(&self) -> ConnectivityState {
        self.inner.connectivity()
    }

    /// Recomputes and returns the global state.
    ///
    /// A change is announced with [`ManagerEvent::StateChanged`]; asking
    /// again without any intervening change announces nothing.
    ///
    /// [`ManagerEvent::StateChanged`]: crate::ManagerEvent::StateChanged
    pub fn state(&mut self) -> NmState {
        self.inner.state()
    }

    pub fn sleeping(&self) -> bool {
        self.inner.sleeping()
    }

    pub fn networking_enabled(&self) -> bool {
        self.inner.networking_enabled()
    }

    /// Whether every managed device finished its startup work.
    pub fn startup_complete(&self) -> bool {
        self.inner.startup_complete()
    }

    // Host environment

    /// Handles one host input.
    pub fn handle_input(&mut self, input: ManagerInput) {
        self.inner.handle_input(input);
    }

    pub fn handle_platform_event(&mut self, event: PlatformEvent) {
        self.inner.handle_platform_event(event);
    }

    pub fn handle_settings_event(&mut self, event: SettingsEvent) {
        self.inner.handle_settings_event(event);
    }

    /// Re-reads the kill switches.
    pub fn rfkill_changed(&mut self) {
        self.inner.rfkill_update();
    }

    /// Re-probes devices that were missing firmware.
    pub fn firmware_changed(&mut self) {
        self.inner.reprobe_firmware();
    }

    /// Registers a device built outside the factory registry.
    ///
    /// Returns `None` if a device with the same identity already exists.
    pub fn add_device(&mut self, device: Device) -> Option<DeviceId> {
        self.inner.add_device(device, true)
    }

    /// Reports a device state change made by the device's own activation
    /// machinery.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownDevice`] for an unknown device.
    pub fn device_state_changed(
        &mut self,
        device: DeviceId,
        state: DeviceState,
        reason: DeviceStateReason,
    ) -> Result<()> {
        self.inner.device_state_changed(device, state, reason)
    }

    /// Records whether an active connection carries the IPv4 and IPv6
    /// default routes.
    pub fn set_default_route(
        &mut self,
        id: ActiveConnectionId,
        default4: bool,
        default6: bool,
    ) -> Result<()> {
        self.inner.set_default_route(id, default4, default6)
    }

    /// Reports progress of a VPN tunnel.
    pub fn vpn_state_changed(
        &mut self,
        id: ActiveConnectionId,
        state: ActiveConnectionState,
        reason: ConnectionStateReason,
    ) -> Result<()> {
        self.inner.vpn_state_changed(id, state, reason)
    }

    /// Holds startup completion until the action is removed again.
    pub fn add_pending_action(&mut self, device: DeviceId, action: &str) -> Result<()> {
        self.inner.add_pending_action(device, action)
    }

    pub fn remove_pending_action(&mut self, device: DeviceId, action: &str) -> Result<()> {
        self.inner.remove_pending_action(device, action)
    }

    /// Replaces the unmanaged device specs and re-evaluates every device.
    pub fn set_unmanaged_specs(&mut self, specs: Vec<String>) {
        self.inner.set_unmanaged_specs(specs);
    }
}
