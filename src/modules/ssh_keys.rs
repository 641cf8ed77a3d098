//! Authorized keys installation for the proxy user
//!
//! Candidate keys are decoded into a private staging directory, one file per
//! key, and each file is checked with `ssh-keygen -l` before it is appended.
//! A rejected key is logged and skipped.

use crate::BastionError;
use crate::paths::ProvisionPaths;
use crate::system::{CommandRunner, args};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of the staging directory name
pub const STAGING_PREFIX: &str = "bastion-keys-";

/// Result of validating and appending the decoded keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInstallOutcome {
    pub added: usize,
    /// Staging files that failed validation
    pub rejected: Vec<String>,
}

/// Create a uniquely named, owner-only staging directory
pub async fn create_staging_dir(paths: &ProvisionPaths) -> Result<PathBuf, BastionError> {
    let parent = paths.tmp_dir();
    fs::create_dir_all(&parent).await?;

    let dir = parent.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple()));
    // create_dir (not _all) fails if the name is already taken
    fs::create_dir(&dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;
    }

    info!("Created staging directory at {}", dir.display());
    Ok(dir)
}

/// Staging file name for the key at `index`
pub fn key_file_name(index: usize) -> String {
    format!("{}.pub", index)
}

/// Decode each base64 candidate into `<dir>/<index>.pub`
///
/// Undecodable input yields an empty file, which validation then rejects.
pub async fn decode_keys(dir: &Path, encoded: &[String]) -> Result<Vec<PathBuf>, BastionError> {
    let mut files = Vec::with_capacity(encoded.len());

    for (index, key) in encoded.iter().enumerate() {
        let path = dir.join(key_file_name(index));
        let decoded = match BASE64.decode(key.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Key {} is not valid base64: {}", index, e);
                Vec::new()
            }
        };

        fs::write(&path, &decoded).await?;
        debug!("Decoded key {} to {}", index, path.display());
        files.push(path);
    }

    info!("Decoded {} keys", files.len());
    Ok(files)
}

/// Validate each staged key and append the valid ones to `authorized_keys`
///
/// Each accepted key is written verbatim followed by a newline.
pub async fn install_authorized_keys(
    runner: &dyn CommandRunner,
    files: &[PathBuf],
    authorized_keys: &Path,
) -> Result<KeyInstallOutcome, BastionError> {
    let mut outcome = KeyInstallOutcome::default();

    for file in files {
        let key_path = file.display().to_string();
        if is_valid_public_key(runner, file).await? {
            debug!("Adding key {}", key_path);
            let content = fs::read(file).await?;
            append_key(authorized_keys, &content).await?;
            info!("Added key {}", key_path);
            outcome.added += 1;
        } else {
            warn!("Key {} appears invalid, skipping", key_path);
            outcome.rejected.push(key_path);
        }
    }

    info!("Added {} keys", outcome.added);
    Ok(outcome)
}

/// `ssh-keygen -l -f <file>` succeeds only for parseable public keys
async fn is_valid_public_key(
    runner: &dyn CommandRunner,
    file: &Path,
) -> Result<bool, BastionError> {
    let target = file.to_string_lossy().into_owned();
    let output = runner
        .run("ssh-keygen", &args(["-l", "-f", target.as_str()]))
        .await?;

    if output.is_success() {
        debug!("Fingerprint: {}", output.stdout.trim());
    }
    Ok(output.is_success())
}

async fn append_key(authorized_keys: &Path, content: &[u8]) -> Result<(), BastionError> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(authorized_keys)
        .await?;

    file.write_all(content).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(())
}

/// Give the authorized keys file to the proxy user, mode 0600
pub async fn secure_authorized_keys(
    runner: &dyn CommandRunner,
    user: &str,
    authorized_keys: &Path,
) -> Result<(), BastionError> {
    if !authorized_keys.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(authorized_keys, std::fs::Permissions::from_mode(0o600)).await?;
    }

    crate::modules::users::chown_recursive(runner, user, authorized_keys).await
}

/// Remove the staging directory; failures are only logged
pub async fn remove_staging_dir(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed staging directory {}", dir.display()),
        Err(e) => warn!("Failed to remove staging directory {}: {}", dir.display(), e),
    }
}
