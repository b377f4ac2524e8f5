//! Builders for connection profiles.
//!
//! Most callers hand profiles to the connection store and let the manager
//! read them back; these builders exist so that code (and tests) can create
//! well-formed profiles without spelling out every field.
//!
//! # Examples
//!
//! ```rust
//! use nmd::builders::ProfileBuilder;
//! use nmd::ConnectionType;
//!
//! let bond = ProfileBuilder::new(ConnectionType::Bond, "bond0")
//!     .interface_name("bond0")
//!     .ipv4_auto()
//!     .build();
//! assert!(bond.needs_virtual_device());
//! ```

pub mod profile_builder;

pub use profile_builder::ProfileBuilder;
