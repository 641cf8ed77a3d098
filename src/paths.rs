//! Filesystem locations touched during provisioning
//!
//! Every path is derived from a root directory so the whole procedure can run
//! against a scratch tree in tests.

use std::path::{Path, PathBuf};

/// Default filesystem root
pub const ROOT_DIR: &str = "/";

/// Host key kinds that can be rotated from the secret store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyKind {
    Ed25519,
    Ecdsa,
}

impl HostKeyKind {
    /// File name of the private key under the SSH config directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ssh_host_ed25519_key",
            Self::Ecdsa => "ssh_host_ecdsa_key",
        }
    }
}

impl std::fmt::Display for HostKeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
            Self::Ecdsa => write!(f, "ecdsa"),
        }
    }
}

/// Standard provisioning paths
#[derive(Debug, Clone)]
pub struct ProvisionPaths {
    /// Filesystem root (default: /)
    pub root: PathBuf,
}

impl Default for ProvisionPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionPaths {
    /// Create with the real filesystem root
    pub fn new() -> Self {
        Self {
            root: PathBuf::from(ROOT_DIR),
        }
    }

    /// Create with a custom root (useful for testing)
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// /etc/ssh - SSH daemon configuration directory
    pub fn ssh_config_dir(&self) -> PathBuf {
        self.root.join("etc/ssh")
    }

    /// /etc/ssh/ssh_host_<kind>_key - Host private key
    pub fn host_key(&self, kind: HostKeyKind) -> PathBuf {
        self.ssh_config_dir().join(kind.file_name())
    }

    /// /etc/ssh/ssh_host_<kind>_key.pub - Host public key
    pub fn host_public_key(&self, kind: HostKeyKind) -> PathBuf {
        self.ssh_config_dir()
            .join(format!("{}.pub", kind.file_name()))
    }

    /// /home/<user> - Proxy user home directory
    pub fn user_home(&self, user: &str) -> PathBuf {
        self.root.join("home").join(user)
    }

    /// /home/<user>/.ssh
    pub fn user_ssh_dir(&self, user: &str) -> PathBuf {
        self.user_home(user).join(".ssh")
    }

    /// /home/<user>/.ssh/authorized_keys
    pub fn authorized_keys(&self, user: &str) -> PathBuf {
        self.user_ssh_dir(user).join("authorized_keys")
    }

    /// /tmp - Parent of the ephemeral key staging directory
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// /run/bastion-init - Runtime state directory
    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run/bastion-init")
    }

    /// /run/bastion-init/result.json - Outcome of the last run
    pub fn result_file(&self) -> PathBuf {
        self.run_dir().join("result.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let paths = ProvisionPaths::new();
        assert_eq!(
            paths.host_key(HostKeyKind::Ed25519),
            PathBuf::from("/etc/ssh/ssh_host_ed25519_key")
        );
        assert_eq!(
            paths.host_public_key(HostKeyKind::Ecdsa),
            PathBuf::from("/etc/ssh/ssh_host_ecdsa_key.pub")
        );
        assert_eq!(
            paths.authorized_keys("proxyuser"),
            PathBuf::from("/home/proxyuser/.ssh/authorized_keys")
        );
        assert_eq!(paths.tmp_dir(), PathBuf::from("/tmp"));
        assert_eq!(
            paths.result_file(),
            PathBuf::from("/run/bastion-init/result.json")
        );
    }

    #[test]
    fn test_custom_root() {
        let paths = ProvisionPaths::with_root("/tmp/scratch");
        assert_eq!(
            paths.user_ssh_dir("tunnel"),
            PathBuf::from("/tmp/scratch/home/tunnel/.ssh")
        );
        assert_eq!(
            paths.ssh_config_dir(),
            PathBuf::from("/tmp/scratch/etc/ssh")
        );
    }
}
