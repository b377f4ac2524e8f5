//! The device-activation engine.
//!
//! Everything here is owned by one [`manager::Manager`] and mutated from one
//! task. Devices and active connections refer to each other by identifier
//! only and are re-resolved through their registries on every use.

pub(crate) mod activation;
pub(crate) mod active_connection;
pub(crate) mod dependency;
pub mod device;
pub(crate) mod device_registry;
pub mod factory;
pub(crate) mod manager;
pub(crate) mod matcher;
pub(crate) mod sleep;
pub mod state;
pub mod state_file;
