//! SSH host key rotation
//!
//! Host keys come from the secret store so every instance behind the load
//! balancer presents the same identity. Both keys are written before the
//! daemon is restarted, and it is restarted at most once.

use crate::BastionError;
use crate::config::ProvisionerConfig;
use crate::paths::{HostKeyKind, ProvisionPaths};
use crate::secrets::{SecretRef, SecretStore};
use crate::system::{CommandRunner, args, run_checked};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Host private keys resolved for this boot
#[derive(Debug, Clone, Default)]
pub struct HostKeyMaterial {
    pub ed25519: Option<String>,
    pub ecdsa: Option<String>,
}

impl HostKeyMaterial {
    /// Supplied keys in write order
    pub fn keys(&self) -> impl Iterator<Item = (HostKeyKind, &str)> {
        [
            (HostKeyKind::Ed25519, self.ed25519.as_deref()),
            (HostKeyKind::Ecdsa, self.ecdsa.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, key)| key.map(|k| (kind, k)))
    }

    pub fn is_empty(&self) -> bool {
        self.ed25519.is_none() && self.ecdsa.is_none()
    }
}

/// Resolve both host key references, if any
pub async fn resolve_host_keys(
    store: &dyn SecretStore,
    config: &ProvisionerConfig,
) -> Result<HostKeyMaterial, BastionError> {
    Ok(HostKeyMaterial {
        ed25519: resolve_one(store, config.ed25519_host_key.as_ref()).await?,
        ecdsa: resolve_one(store, config.ecdsa_host_key.as_ref()).await?,
    })
}

async fn resolve_one(
    store: &dyn SecretStore,
    reference: Option<&SecretRef>,
) -> Result<Option<String>, BastionError> {
    let Some(reference) = reference else {
        return Ok(None);
    };

    debug!("Resolving host key {} via {}", reference, store.name());
    let value = store.get_secret(reference).await?;
    if value.trim().is_empty() {
        return Err(BastionError::secret(reference.to_string(), "secret is empty"));
    }
    Ok(Some(value))
}

/// Write every supplied host key and its public half
///
/// Returns whether the SSH daemon needs a restart.
pub async fn install_host_keys(
    runner: &dyn CommandRunner,
    paths: &ProvisionPaths,
    material: &HostKeyMaterial,
) -> Result<bool, BastionError> {
    if material.is_empty() {
        debug!("No host keys supplied");
        return Ok(false);
    }

    let mut restart_needed = false;

    for (kind, key) in material.keys() {
        write_host_key(runner, paths, kind, key).await?;
        restart_needed = true;
    }

    Ok(restart_needed)
}

async fn write_host_key(
    runner: &dyn CommandRunner,
    paths: &ProvisionPaths,
    kind: HostKeyKind,
    key: &str,
) -> Result<(), BastionError> {
    let private_path = paths.host_key(kind);
    let public_path = paths.host_public_key(kind);
    info!("Installing {} host key at {}", kind, private_path.display());

    fs::create_dir_all(paths.ssh_config_dir()).await?;

    // OpenSSH refuses private keys without a final newline
    let mut content = key.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    write_private(&private_path, content.as_bytes()).await?;

    let private_arg = private_path.to_string_lossy().into_owned();
    let output = run_checked(runner, "ssh-keygen", &args(["-y", "-f", private_arg.as_str()]))
        .await
        .map_err(|e| BastionError::HostKey(format!("cannot derive {} public key: {}", kind, e)))?;

    let public_key = output.stdout.trim();
    if public_key.is_empty() {
        return Err(BastionError::HostKey(format!(
            "ssh-keygen produced no {} public key",
            kind
        )));
    }

    fs::write(&public_path, format!("{}\n", public_key)).await?;
    set_mode(&public_path, 0o644).await?;

    debug!("Wrote {}", public_path.display());
    Ok(())
}

/// Restart the SSH daemon so it picks up new host keys
pub async fn restart_sshd(runner: &dyn CommandRunner) -> Result<(), BastionError> {
    info!("Restarting sshd");
    run_checked(runner, "systemctl", &args(["restart", "sshd"])).await?;
    Ok(())
}

/// Write a file that is never readable by anyone but its owner
async fn write_private(path: &Path, content: &[u8]) -> Result<(), BastionError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.flush().await?;

    // An existing file keeps its old mode
    set_mode(path, 0o600).await
}

async fn set_mode(path: &Path, mode: u32) -> Result<(), BastionError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
