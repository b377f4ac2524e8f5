//! Type definitions and constants.
//!
//! This module contains exported codes and per-device-type metadata.

pub(crate) mod constants;
pub(crate) mod device_type_registry;
