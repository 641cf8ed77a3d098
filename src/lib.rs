//! bastion-init library
//!
//! Boot-time provisioning for highly-available SSH bastion hosts: a
//! restricted proxy user, operator public keys, optional host key rotation
//! from a secret store, and optional metadata-service lockdown. Also renders
//! the user data that starts it all and validates the deployment config.
//!
//! # Design Principles
//!
//! - **Safety First**: No unsafe code (`#![forbid(unsafe_code)]`)
//! - **Fail Fast**: Setup failures abort the boot, invalid keys do not
//! - **Testable**: Privileged commands and secret lookups sit behind traits

pub mod config;
pub mod ingress;
pub mod modules;
pub mod paths;
pub mod provisioner;
pub mod secrets;
pub mod system;
pub mod userdata;

mod error;

pub use error::BastionError;
pub use provisioner::{ProvisionReport, Provisioner};

/// Provisioning steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Resolve and write SSH host keys
    HostKeys,
    /// Restart sshd after new host keys
    SshdRestart,
    /// Block the metadata service for non-root users
    MetadataLockdown,
    /// Create the proxy user
    ProxyUser,
    /// Stage, validate and install public keys
    AuthorizedKeys,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::HostKeys => write!(f, "host-keys"),
            Step::SshdRestart => write!(f, "sshd-restart"),
            Step::MetadataLockdown => write!(f, "metadata-lockdown"),
            Step::ProxyUser => write!(f, "proxy-user"),
            Step::AuthorizedKeys => write!(f, "authorized-keys"),
        }
    }
}
