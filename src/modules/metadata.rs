//! Instance metadata service lockdown
//!
//! Installs a persistent iptables service and drops traffic to the metadata
//! endpoint from every process not owned by root. This runs before the proxy
//! user exists; a proxy user later granted sudo can still reach the endpoint.

use crate::BastionError;
use crate::modules::packages::{self, PackageManager};
use crate::system::{CommandRunner, args, run_checked};
use tracing::info;

/// Link-local address of the instance metadata service
pub const METADATA_ADDRESS: &str = "169.254.169.254";

/// iptables arguments for the owner-match DROP rule
pub fn drop_rule_args() -> Vec<String> {
    args([
        "-A",
        "OUTPUT",
        "-m",
        "owner",
        "!",
        "--uid-owner",
        "root",
        "-d",
        METADATA_ADDRESS,
        "-j",
        "DROP",
    ])
}

/// Block metadata-service access for non-root processes
pub async fn block_metadata_service(runner: &dyn CommandRunner) -> Result<(), BastionError> {
    info!("Disabling access to the instance metadata service");

    let pm = PackageManager::detect(runner)
        .await
        .ok_or_else(|| BastionError::Command("No supported package manager found".to_string()))?;

    packages::install_packages(runner, pm, &[pm.firewall_package()]).await?;

    let service = pm.firewall_service();
    run_checked(runner, "systemctl", &args(["enable", service])).await?;
    run_checked(runner, "systemctl", &args(["start", service])).await?;

    run_checked(runner, "iptables", &drop_rule_args()).await?;

    info!("Metadata service blocked for non-root users");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CommandOutput;
    use crate::system::mock::MockRunner;

    fn yum_host() -> MockRunner {
        MockRunner::new().with_handler("which", |a| {
            if a.first().map(String::as_str) == Some("yum") {
                CommandOutput::success("/usr/bin/yum")
            } else {
                CommandOutput::failure(1, "")
            }
        })
    }

    #[tokio::test]
    async fn test_block_metadata_service_sequence() {
        let runner = yum_host();
        block_metadata_service(&runner).await.unwrap();

        let lines: Vec<String> = runner
            .calls()
            .into_iter()
            .filter(|c| c.program != "which")
            .map(|c| c.command_line())
            .collect();

        assert_eq!(
            lines,
            vec![
                "yum install -y iptables-services",
                "systemctl enable iptables",
                "systemctl start iptables",
                "iptables -A OUTPUT -m owner ! --uid-owner root -d 169.254.169.254 -j DROP",
            ]
        );
    }

    #[tokio::test]
    async fn test_rule_failure_is_fatal() {
        let runner =
            yum_host().with_output("iptables", CommandOutput::failure(4, "can't initialize"));
        assert!(block_metadata_service(&runner).await.is_err());
    }

    #[tokio::test]
    async fn test_no_package_manager() {
        let runner = MockRunner::new().with_output("which", CommandOutput::failure(1, ""));
        let err = block_metadata_service(&runner).await.unwrap_err();
        assert!(err.to_string().contains("package manager"));
        assert!(runner.calls_to("iptables").is_empty());
    }
}
