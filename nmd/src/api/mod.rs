//! Public API module.
//!
//! This module contains the user-facing types and the [`NetworkManager`]
//! facade of the `nmd` crate.
//!
//! [`NetworkManager`]: network_manager::NetworkManager

pub mod builders;
pub mod models;
pub mod network_manager;
pub mod profile;
