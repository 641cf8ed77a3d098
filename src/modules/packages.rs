//! Package management module
//!
//! Installs packages using the appropriate package manager (apt, yum, dnf, zypper).

use crate::BastionError;
use crate::system::{CommandRunner, args};
use tracing::{debug, info};

/// Detected package manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Zypper,
    Apk,
}

impl PackageManager {
    /// Detect the system's package manager
    pub async fn detect(runner: &dyn CommandRunner) -> Option<Self> {
        // Check in order of preference
        let candidates = [
            ("apt-get", Self::Apt),
            ("dnf", Self::Dnf),
            ("yum", Self::Yum),
            ("zypper", Self::Zypper),
            ("apk", Self::Apk),
        ];

        for (cmd, pm) in candidates {
            if command_exists(runner, cmd).await {
                return Some(pm);
            }
        }
        None
    }

    fn install_command(&self) -> (&'static str, Vec<&'static str>) {
        match self {
            Self::Apt => ("apt-get", vec!["install", "-y"]),
            Self::Dnf => ("dnf", vec!["install", "-y"]),
            Self::Yum => ("yum", vec!["install", "-y"]),
            Self::Zypper => ("zypper", vec!["--non-interactive", "install"]),
            Self::Apk => ("apk", vec!["add", "--no-cache"]),
        }
    }

    /// Environment for unattended installs
    fn install_env(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Apt => &[("DEBIAN_FRONTEND", "noninteractive")],
            _ => &[],
        }
    }

    /// Package that persists iptables rules as a service
    pub fn firewall_package(&self) -> &'static str {
        match self {
            Self::Dnf | Self::Yum => "iptables-services",
            Self::Apt => "iptables-persistent",
            Self::Zypper | Self::Apk => "iptables",
        }
    }

    /// Service unit managing the persisted iptables rules
    pub fn firewall_service(&self) -> &'static str {
        match self {
            Self::Apt => "netfilter-persistent",
            _ => "iptables",
        }
    }
}

/// Check if a command exists
async fn command_exists(runner: &dyn CommandRunner, cmd: &str) -> bool {
    runner
        .run("which", &args([cmd]))
        .await
        .is_ok_and(|o| o.is_success())
}

/// Install packages
pub async fn install_packages(
    runner: &dyn CommandRunner,
    pm: PackageManager,
    packages: &[&str],
) -> Result<(), BastionError> {
    if packages.is_empty() {
        return Ok(());
    }

    info!("Installing {} packages using {:?}", packages.len(), pm);
    debug!("Packages: {:?}", packages);

    let (cmd, base_args) = pm.install_command();
    let mut install_args = args(base_args);
    install_args.extend(args(packages));

    let output = runner.run_with_env(cmd, &install_args, pm.install_env()).await?;

    if !output.is_success() {
        return Err(BastionError::Command(format!(
            "Failed to install packages: {}",
            output.stderr.trim()
        )));
    }

    info!("Successfully installed {} packages", packages.len());
    Ok(())
}
