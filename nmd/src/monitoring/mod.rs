//! Change notifications published by the manager.

pub mod events;
