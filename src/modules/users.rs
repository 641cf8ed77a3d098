//! Proxy user creation and home directory setup

use crate::BastionError;
use crate::paths::ProvisionPaths;
use crate::system::{CommandRunner, args, run_checked};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// Shell for proxy users without shell access; allows port forwarding only
pub const NOLOGIN_SHELL: &str = "/sbin/nologin";

/// useradd exit code for "user already exists"
const USERADD_EXISTS: i32 = 9;

/// `useradd` arguments for the proxy user
pub fn useradd_args(name: &str, allow_shell: bool) -> Vec<String> {
    let mut cmd = args(["--create-home"]);
    if !allow_shell {
        cmd.extend(args(["--shell", NOLOGIN_SHELL]));
    }
    cmd.push(name.to_string());
    cmd
}

/// Create the proxy user
///
/// An existing account is accepted so a re-run on the same root volume does
/// not abort the boot.
pub async fn create_proxy_user(
    runner: &dyn CommandRunner,
    name: &str,
    allow_shell: bool,
) -> Result<(), BastionError> {
    info!(
        "Creating proxy user {} ({})",
        name,
        if allow_shell { "default shell" } else { NOLOGIN_SHELL }
    );

    let output = runner.run("useradd", &useradd_args(name, allow_shell)).await?;

    if output.code == Some(USERADD_EXISTS) {
        warn!("User {} already exists", name);
        return Ok(());
    }

    if !output.is_success() {
        return Err(BastionError::UserGroup(format!(
            "Failed to create user {}: {}",
            name,
            output.stderr.trim()
        )));
    }

    Ok(())
}

/// Create `~/.ssh`, hand the home tree and the staging directory to the
/// user, and restrict `~/.ssh` to its owner
pub async fn prepare_home(
    runner: &dyn CommandRunner,
    paths: &ProvisionPaths,
    name: &str,
    staging_dir: &Path,
) -> Result<(), BastionError> {
    let home = paths.user_home(name);
    let ssh_dir = paths.user_ssh_dir(name);

    debug!("Creating SSH directory: {}", ssh_dir.display());
    fs::create_dir_all(&ssh_dir).await?;

    chown_recursive(runner, name, &home).await?;
    chown_recursive(runner, name, staging_dir).await?;
    restrict_recursive(&ssh_dir).await?;

    Ok(())
}

/// `chown -R user:user path`
pub async fn chown_recursive(
    runner: &dyn CommandRunner,
    user: &str,
    path: &Path,
) -> Result<(), BastionError> {
    let owner = format!("{}:{}", user, user);
    let target = path.to_string_lossy().into_owned();
    run_checked(runner, "chown", &args(["-R", owner.as_str(), target.as_str()])).await?;
    Ok(())
}

/// `chmod -R 700` on a directory whose entries are all plain files
async fn restrict_recursive(dir: &Path) -> Result<(), BastionError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;

        let mut read_dir = fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(0o700)).await?;
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CommandOutput;
    use crate::system::mock::MockRunner;
    use tempfile::TempDir;

    #[test]
    fn test_useradd_args_shell_access() {
        assert_eq!(
            useradd_args("proxyuser", true),
            vec!["--create-home", "proxyuser"]
        );
        assert_eq!(
            useradd_args("proxyuser", false),
            vec!["--create-home", "--shell", "/sbin/nologin", "proxyuser"]
        );
    }

    #[tokio::test]
    async fn test_create_user_tolerates_existing() {
        let runner = MockRunner::new()
            .with_output("useradd", CommandOutput::failure(9, "user 'proxyuser' already exists"));
        create_proxy_user(&runner, "proxyuser", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_user_failure_is_fatal() {
        let runner = MockRunner::new()
            .with_output("useradd", CommandOutput::failure(1, "cannot lock /etc/passwd"));
        let err = create_proxy_user(&runner, "proxyuser", true).await.unwrap_err();
        assert!(matches!(err, BastionError::UserGroup(_)));
        assert!(err.to_string().contains("cannot lock"));
    }

    #[tokio::test]
    async fn test_prepare_home() {
        let temp = TempDir::new().unwrap();
        let paths = ProvisionPaths::with_root(temp.path());
        let staging = temp.path().join("tmp/bastion-keys-test");
        fs::create_dir_all(&staging).await.unwrap();
        let runner = MockRunner::new();

        prepare_home(&runner, &paths, "tunnel", &staging).await.unwrap();

        assert!(paths.user_ssh_dir("tunnel").is_dir());
        let chowns = runner.calls_to("chown");
        assert_eq!(chowns.len(), 2);
        assert_eq!(
            chowns[0].args,
            vec![
                "-R".to_string(),
                "tunnel:tunnel".to_string(),
                paths.user_home("tunnel").to_string_lossy().into_owned(),
            ]
        );
        assert_eq!(chowns[1].args[2], staging.to_string_lossy());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(paths.user_ssh_dir("tunnel"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[tokio::test]
    async fn test_prepare_home_chown_failure() {
        let temp = TempDir::new().unwrap();
        let paths = ProvisionPaths::with_root(temp.path());
        let runner = MockRunner::new()
            .with_output("chown", CommandOutput::failure(1, "invalid user"));

        let result = prepare_home(&runner, &paths, "ghost", temp.path()).await;
        assert!(result.is_err());
    }
}
