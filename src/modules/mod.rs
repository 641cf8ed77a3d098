//! Provisioning modules
//!
//! Each module handles one step of the boot-time procedure. The
//! [`crate::provisioner`] runs them in a fixed order.

pub mod host_keys;
pub mod metadata;
pub mod packages;
pub mod ssh_keys;
pub mod users;
