//! Sleep, networking enable and radio kill switches.

use log::{debug, info, warn};

use super::manager::{Manager, Operation, Reply};
use crate::api::models::{
    DeviceState, DeviceStateReason, Permission, RfkillState, RfkillType, Subject, UnmanagedFlags,
};
use crate::monitoring::events::ManagerEvent;

/// Enable state of one radio class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Radio {
    pub(crate) rtype: RfkillType,
    /// What the user asked for; persisted.
    pub(crate) user_enabled: bool,
    pub(crate) sw_enabled: bool,
    pub(crate) hw_enabled: bool,
    /// Last effective state applied to devices.
    pub(crate) enabled: bool,
}

impl Radio {
    pub(crate) fn new(rtype: RfkillType, user_enabled: bool) -> Self {
        Self {
            rtype,
            user_enabled,
            sw_enabled: true,
            hw_enabled: true,
            enabled: user_enabled,
        }
    }

    fn effective(&self) -> bool {
        self.user_enabled && self.sw_enabled && self.hw_enabled
    }
}

impl Manager {
    /// Asleep or networking disabled; either way devices are unmanaged.
    pub(crate) fn manager_sleeping(&self) -> bool {
        self.sleeping || !self.networking_enabled
    }

    pub(crate) fn sleeping(&self) -> bool {
        self.sleeping
    }

    pub(crate) fn networking_enabled(&self) -> bool {
        self.networking_enabled
    }

    pub(crate) fn radio_enabled(&self, rtype: RfkillType) -> bool {
        self.radios
            .iter()
            .find(|r| r.rtype == rtype)
            .is_some_and(|r| r.user_enabled)
    }

    pub(crate) fn radio_hardware_enabled(&self, rtype: RfkillType) -> bool {
        self.radios
            .iter()
            .find(|r| r.rtype == rtype)
            .is_some_and(|r| r.hw_enabled)
    }

    pub(super) fn radio_effective(&self, rtype: RfkillType) -> bool {
        self.radios
            .iter()
            .find(|r| r.rtype == rtype)
            .is_none_or(|r| r.effective())
    }

    pub(crate) fn sleep(&mut self, sleep: bool, subject: &Subject) -> Reply<()> {
        let (reply, answer) = Reply::channel();
        self.request_operation(subject, Permission::SleepWake, Operation::Sleep { sleep, reply });
        answer
    }

    pub(crate) fn enable(&mut self, enable: bool, subject: &Subject) -> Reply<()> {
        let (reply, answer) = Reply::channel();
        self.request_operation(
            subject,
            Permission::EnableDisableNetwork,
            Operation::Enable { enable, reply },
        );
        answer
    }

    pub(crate) fn set_radio_enabled(
        &mut self,
        radio: RfkillType,
        enabled: bool,
        subject: &Subject,
    ) -> Reply<()> {
        let (reply, answer) = Reply::channel();
        self.request_operation(
            subject,
            Permission::for_radio(radio),
            Operation::Radio {
                radio,
                enabled,
                reply,
            },
        );
        answer
    }

    pub(super) fn do_sleep(&mut self, sleep: bool) {
        if self.sleeping == sleep {
            info!("already {}", if sleep { "asleep" } else { "awake" });
            return;
        }
        info!("{}", if sleep { "sleeping" } else { "waking up" });
        self.sleeping = sleep;
        self.emit(ManagerEvent::SleepingChanged(sleep));
        self.do_sleep_wake(true);
    }

    pub(super) fn do_enable(&mut self, enable: bool) {
        if self.networking_enabled == enable {
            info!("networking is already {}", if enable { "enabled" } else { "disabled" });
            return;
        }
        info!("{} networking", if enable { "enabling" } else { "disabling" });
        self.networking_enabled = enable;
        if let Err(e) = self.state_file.update(|s| s.networking_enabled = enable) {
            warn!("failed to persist networking state: {e}");
        }
        self.emit(ManagerEvent::NetworkingEnabledChanged(enable));
        self.do_sleep_wake(false);
    }

    /// Unmanages or re-manages every device after a sleep or enable change.
    ///
    /// When suspending, devices armed for wake-on-LAN keep running so they
    /// can wake the host.
    fn do_sleep_wake(&mut self, suspending: bool) {
        if self.manager_sleeping() {
            for id in self.devices.ids() {
                let Some(dev) = self.devices.get(id) else {
                    continue;
                };
                if dev.is_software() {
                    continue;
                }
                if suspending
                    && let Some(ifindex) = dev.ifindex()
                    && self.platform.wake_on_lan(ifindex)
                {
                    debug!("({}): leaving armed for wake-on-LAN", dev.interface());
                    continue;
                }
                self.set_unmanaged(id, UnmanagedFlags::INTERNAL, true, DeviceStateReason::Sleeping);
            }
        } else {
            for id in self.devices.ids() {
                let Some(dev) = self.devices.get(id) else {
                    continue;
                };
                if !dev.is_software()
                    && dev.is_managed()
                    && let Some(ifindex) = dev.ifindex()
                    && self.platform.wake_on_lan(ifindex)
                {
                    if let Err(e) = self.platform.set_link_down(ifindex) {
                        warn!("({}): failed to take link down: {e}", dev.interface());
                    }
                    self.set_unmanaged(id, UnmanagedFlags::INTERNAL, true, DeviceStateReason::Sleeping);
                }
            }

            self.rfkill_update();
            for id in self.devices.ids() {
                let Some(rtype) = self.devices.get(id).and_then(|d| d.rfkill_type()) else {
                    continue;
                };
                let enabled = self.radio_effective(rtype);
                if let Some(dev) = self.devices.get_mut(id) {
                    dev.radio_enabled = enabled;
                }
            }
            for id in self.devices.ids() {
                if let Some(dev) = self.devices.get_mut(id) {
                    dev.autoconnect = true;
                }
                self.set_unmanaged(id, UnmanagedFlags::INTERNAL, false, DeviceStateReason::NowManaged);
            }
        }
        self.update_state();
    }

    pub(super) fn do_set_radio_enabled(&mut self, rtype: RfkillType, enabled: bool) {
        if self.manager_sleeping() {
            debug!("ignoring {rtype} radio change while asleep");
            return;
        }
        if let Err(e) = self.state_file.update(|s| s.set_radio_enabled(rtype, enabled)) {
            warn!("failed to persist {rtype} radio state: {e}");
        }
        if let Some(radio) = self.radios.iter_mut().find(|r| r.rtype == rtype) {
            if radio.user_enabled == enabled {
                return;
            }
            radio.user_enabled = enabled;
        }
        info!("{rtype} radio {} by user", if enabled { "enabled" } else { "disabled" });
        self.apply_radio(rtype);
    }

    /// Re-reads every kill switch and applies the result.
    pub(crate) fn rfkill_update(&mut self) {
        for rtype in RfkillType::ALL {
            let (sw, hw) = if self.config.radio_management {
                match self.rfkill.state(rtype) {
                    Some(RfkillState::Unblocked) | None => (true, true),
                    Some(RfkillState::SoftBlocked) => (false, true),
                    Some(RfkillState::HardBlocked) => (true, false),
                }
            } else {
                (true, true)
            };
            if let Some(radio) = self.radios.iter_mut().find(|r| r.rtype == rtype)
                && (radio.sw_enabled != sw || radio.hw_enabled != hw)
            {
                debug!("{rtype} kill switch: software {sw}, hardware {hw}");
                radio.sw_enabled = sw;
                radio.hw_enabled = hw;
            }
            self.apply_radio(rtype);
        }
    }

    /// Pushes the effective state of a radio to its devices.
    fn apply_radio(&mut self, rtype: RfkillType) {
        let Some(radio) = self.radios.iter_mut().find(|r| r.rtype == rtype) else {
            return;
        };
        let enabled = radio.effective();
        if radio.enabled != enabled {
            radio.enabled = enabled;
            info!("{rtype} now {}", if enabled { "enabled" } else { "disabled" });
            self.emit(ManagerEvent::RadioEnabledChanged {
                radio: rtype,
                enabled,
            });
        }

        let affected: Vec<_> = self
            .devices
            .iter()
            .filter(|d| d.rfkill_type() == Some(rtype) && d.radio_enabled != enabled)
            .map(|d| d.id())
            .collect();
        for id in affected {
            if let Some(dev) = self.devices.get_mut(id) {
                dev.radio_enabled = enabled;
            }
            if enabled {
                self.check_available(id, DeviceStateReason::None);
            } else {
                if let Some(ac) = self.devices.get(id).and_then(|d| d.act_request) {
                    self.deactivate_internal(ac, DeviceStateReason::None);
                }
                let state = self.devices.get(id).map(|d| d.state());
                if state.is_some_and(|s| s > DeviceState::Unavailable) {
                    self.set_device_state(id, DeviceState::Unavailable, DeviceStateReason::None);
                }
            }
        }
    }
}
