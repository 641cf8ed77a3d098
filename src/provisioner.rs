//! Boot-time key provisioning procedure
//!
//! Runs once per boot, single-threaded, in a fixed order:
//! 1. Host keys from the secret store (optional)
//! 2. One sshd restart if any host key was written
//! 3. Metadata-service lockdown (optional, before the user exists)
//! 4. Proxy user creation
//! 5. Key staging, validation and authorized_keys installation
//!
//! Failures in steps 1-4 abort the run. Invalid keys are skipped. The staging
//! directory is removed whatever happened after it was created.

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::ProvisionerConfig;
use crate::modules::{host_keys, metadata, ssh_keys, users};
use crate::paths::ProvisionPaths;
use crate::secrets::SecretStore;
use crate::system::CommandRunner;
use crate::{BastionError, Step};

/// What a provisioning run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub host_keys_installed: Vec<String>,
    pub sshd_restarted: bool,
    pub metadata_blocked: bool,
    pub user_created: bool,
    pub keys_decoded: usize,
    pub keys_added: usize,
    pub rejected: Vec<String>,
}

/// Runs the provisioning procedure against a command runner and secret store
pub struct Provisioner<'a> {
    runner: &'a dyn CommandRunner,
    secrets: &'a dyn SecretStore,
    paths: ProvisionPaths,
}

impl<'a> Provisioner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, secrets: &'a dyn SecretStore) -> Self {
        Self {
            runner,
            secrets,
            paths: ProvisionPaths::new(),
        }
    }

    /// Use custom paths
    pub fn with_paths(mut self, paths: ProvisionPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn paths(&self) -> &ProvisionPaths {
        &self.paths
    }

    /// Run every step for `config`
    pub async fn run(&self, config: &ProvisionerConfig) -> Result<ProvisionReport, BastionError> {
        config.validate()?;
        let mut report = ProvisionReport::default();

        // Secret references are resolved once, before anything is written
        let material = host_keys::resolve_host_keys(self.secrets, config)
            .await
            .map_err(|e| BastionError::step(Step::HostKeys, e.to_string()))?;

        info!("Starting step: {}", Step::HostKeys);
        let restart_needed = host_keys::install_host_keys(self.runner, &self.paths, &material)
            .await
            .map_err(|e| BastionError::step(Step::HostKeys, e.to_string()))?;
        report.host_keys_installed = material.keys().map(|(kind, _)| kind.to_string()).collect();

        if restart_needed {
            info!("Starting step: {}", Step::SshdRestart);
            host_keys::restart_sshd(self.runner)
                .await
                .map_err(|e| BastionError::step(Step::SshdRestart, e.to_string()))?;
            report.sshd_restarted = true;
        }

        if config.block_metadata_service {
            info!("Starting step: {}", Step::MetadataLockdown);
            metadata::block_metadata_service(self.runner)
                .await
                .map_err(|e| BastionError::step(Step::MetadataLockdown, e.to_string()))?;
            report.metadata_blocked = true;
        }

        if config.public_keys.is_empty() {
            info!("No public keys to add");
            return Ok(report);
        }

        info!("Starting step: {}", Step::ProxyUser);
        users::create_proxy_user(self.runner, &config.proxy_user, config.allow_shell)
            .await
            .map_err(|e| BastionError::step(Step::ProxyUser, e.to_string()))?;
        report.user_created = true;

        info!("Starting step: {}", Step::AuthorizedKeys);
        let staging = ssh_keys::create_staging_dir(&self.paths)
            .await
            .map_err(|e| BastionError::step(Step::AuthorizedKeys, e.to_string()))?;

        let result = self.install_keys(config, &staging, &mut report).await;
        ssh_keys::remove_staging_dir(&staging).await;
        result.map_err(|e| BastionError::step(Step::AuthorizedKeys, e.to_string()))?;

        info!("Done");
        Ok(report)
    }

    async fn install_keys(
        &self,
        config: &ProvisionerConfig,
        staging: &std::path::Path,
        report: &mut ProvisionReport,
    ) -> Result<(), BastionError> {
        let files = ssh_keys::decode_keys(staging, &config.public_keys).await?;
        report.keys_decoded = files.len();

        users::prepare_home(self.runner, &self.paths, &config.proxy_user, staging).await?;

        let authorized_keys = self.paths.authorized_keys(&config.proxy_user);
        let outcome =
            ssh_keys::install_authorized_keys(self.runner, &files, &authorized_keys).await?;
        report.keys_added = outcome.added;
        report.rejected = outcome.rejected;

        ssh_keys::secure_authorized_keys(self.runner, &config.proxy_user, &authorized_keys).await
    }

    /// Persist the report as JSON for later inspection; failures are logged
    pub async fn write_report(&self, report: &ProvisionReport) {
        let result = serde_json::json!({
            "v1": report,
        });

        let path = self.paths.result_file();
        match fs::create_dir_all(self.paths.run_dir()).await {
            Ok(_) => {
                if let Err(e) = fs::write(&path, result.to_string()).await {
                    warn!("Could not write result file: {}", e);
                } else {
                    debug!("Wrote {}", path.display());
                }
            }
            Err(e) => {
                debug!("Could not create run directory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretRef;
    use crate::secrets::mock::MockSecretStore;
    use crate::system::CommandOutput;
    use crate::system::mock::MockRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rejects_invalid_user_before_any_command() {
        let runner = MockRunner::new();
        let store = MockSecretStore::new();
        let config = ProvisionerConfig {
            proxy_user: String::new(),
            ..Default::default()
        };

        assert!(Provisioner::new(&runner, &store).run(&config).await.is_err());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_secret_aborts_before_writes() {
        let temp = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let store = MockSecretStore::new();
        let config = ProvisionerConfig {
            ed25519_host_key: Some(SecretRef::Managed("missing".to_string())),
            public_keys: vec!["c3NoLWVkMjU1MTkgQUFBQQ==".to_string()],
            ..Default::default()
        };

        let err = Provisioner::new(&runner, &store)
            .with_paths(ProvisionPaths::with_root(temp.path()))
            .run(&config)
            .await
            .unwrap_err();

        assert!(matches!(err, BastionError::Step { ref step, .. } if step == "host-keys"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_user_failure_skips_key_steps() {
        let temp = TempDir::new().unwrap();
        let paths = ProvisionPaths::with_root(temp.path());
        let runner = MockRunner::new().with_output("useradd", CommandOutput::failure(1, "boom"));
        let store = MockSecretStore::new();
        let config = ProvisionerConfig {
            public_keys: vec!["c3NoLWVkMjU1MTkgQUFBQQ==".to_string()],
            ..Default::default()
        };

        let err = Provisioner::new(&runner, &store)
            .with_paths(paths.clone())
            .run(&config)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("proxy-user"));
        assert!(runner.calls_to("ssh-keygen").is_empty());
        assert!(!paths.tmp_dir().exists());
    }

    #[tokio::test]
    async fn test_write_report() {
        let temp = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let store = MockSecretStore::new();
        let provisioner = Provisioner::new(&runner, &store)
            .with_paths(ProvisionPaths::with_root(temp.path()));

        let report = ProvisionReport {
            keys_decoded: 2,
            keys_added: 1,
            ..Default::default()
        };
        provisioner.write_report(&report).await;

        let written = fs::read_to_string(provisioner.paths().result_file())
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["v1"]["keys_decoded"], 2);
        assert_eq!(value["v1"]["keys_added"], 1);
    }
}
