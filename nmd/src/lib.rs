//! Device-activation core of a host network-management daemon.
//!
//! This crate owns the network devices of a host and the connections
//! activated on them:
//!
//! - Creating devices for kernel links and virtual interfaces
//! - Activating stored or partial connection profiles, including their
//!   master and parent dependencies and VPNs over a base connection
//! - Assuming connections already configured when the daemon starts
//! - Sleep, networking enable and radio kill switch handling
//! - Deriving the global networking and connectivity state
//!
//! Everything the manager talks to (connection storage, the kernel,
//! authorization, connectivity checks, kill switches) sits behind a trait
//! in [`backend`], with in-memory implementations for embedding and tests.
//!
//! # Example
//!
//! ```rust
//! use nmd::backend::memory::MemoryPlatform;
//! use nmd::backend::{LinkType, PlatformLink};
//! use nmd::{NetworkManager, NmState};
//!
//! let platform = MemoryPlatform::with_links([
//!     PlatformLink::new(2, "eth0", LinkType::Ethernet).with_carrier(true),
//! ]);
//! let mut nm = NetworkManager::builder().platform(platform).build();
//! nm.start();
//!
//! let eth0 = nm.get_device_by_ip_iface("eth0").unwrap();
//! println!("{} is {}", eth0.interface, eth0.state);
//! assert_eq!(nm.state(), NmState::Disconnected);
//! ```
//!
//! # Error Handling
//!
//! Operations return `Result<T, ManagerError>`. Each variant names a class
//! of failure (permission, unknown device, dependency and so on) and carries
//! a human-readable message.
//!
//! # Driving the Manager
//!
//! The manager is single-owner and never spawns. Requests that wait on
//! authorization or a connectivity check answer through a [`Reply`], which
//! only resolves while the manager is driven by
//! [`NetworkManager::run`] or [`NetworkManager::settle`].
//!
//! # Logging
//!
//! This crate uses the [`log`](https://docs.rs/log) facade for logging. To see
//! log output, add a logging implementation like `env_logger`. For example:
//!
//! ```no_run,ignore
//! env_logger::init();
//! // ...
//! ```

// Internal implementation modules
mod core;
mod types;
mod util;

// Public API modules
pub mod api;
pub mod backend;
pub mod monitoring;

pub use api::builders;
pub use api::models;
pub use api::profile;

// Re-exported public API
pub use api::models::{
    ActiveConnectionId, ActiveConnectionInfo, ActiveConnectionState, AuthResult,
    ConnectionStateReason, ConnectivityState, DeviceId, DeviceInfo, DeviceState,
    DeviceStateReason, ManagerConfig, ManagerError, NmState, Permission, RfkillState, RfkillType,
    Subject, UnmanagedFlags,
};
pub use api::network_manager::{NetworkManager, NetworkManagerBuilder};
pub use api::profile::{ConnectionProfile, ConnectionType, PartialProfile};
pub use crate::core::device::{Device, DeviceKind};
pub use crate::core::factory::{DeviceFactory, DeviceFactoryRegistry, FactoryError, LinkContext, WirelessFactory};
pub use crate::core::manager::{ActivationHandle, Reply};
pub use crate::core::state_file::{PersistedState, StateFile, StateFileError};
pub use monitoring::events::{EventStream, ManagerEvent};

/// A specialized `Result` type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;
