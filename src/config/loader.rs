//! Bastion config loader

use super::BastionConfig;
use crate::BastionError;
use crate::ingress::IngressPolicy;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// A config that passed validation, with the ingress policy it implies
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub config: BastionConfig,
    pub ingress: IngressPolicy,
}

/// Load a bastion config from a YAML file
pub async fn load_config_file(path: impl AsRef<Path>) -> Result<BastionConfig, BastionError> {
    let path = path.as_ref();

    let content = fs::read_to_string(path).await.map_err(|e| {
        BastionError::Config(format!("Cannot read {}: {}", path.display(), e))
    })?;

    debug!("Loaded bastion config from {}", path.display());
    BastionConfig::from_yaml(&content)
}

/// Validate a config before anything is rendered from it
///
/// Fails when neither an allow-list nor open-to-internet is chosen, when a
/// CIDR does not parse, or when the proxy user settings are unusable.
pub fn validate_config(config: BastionConfig) -> Result<ValidatedConfig, BastionError> {
    let ingress = IngressPolicy::from_config(&config.allowed_cidrs, config.open_to_internet)?;
    config.provisioner_config()?;

    info!(
        "Bastion config valid: {} public keys, {} ingress rules",
        config.public_keys.len(),
        ingress.rules().len()
    );

    Ok(ValidatedConfig { config, ingress })
}

/// Load and validate a bastion config file
pub async fn load_validated(path: impl AsRef<Path>) -> Result<ValidatedConfig, BastionError> {
    validate_config(load_config_file(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_config_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bastion.yaml");

        fs::write(&path, "proxy_user_name: tunnel\nopen_to_internet: true\n")
            .await
            .unwrap();

        let config = load_config_file(&path).await.unwrap();
        assert_eq!(config.proxy_user_name, "tunnel");
        assert!(config.open_to_internet);
    }

    #[tokio::test]
    async fn test_load_config_file_not_exists() {
        let result = load_config_file("/nonexistent/bastion.yaml").await;
        assert!(matches!(result, Err(BastionError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_config_file_invalid_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bastion.yaml");
        fs::write(&path, "allowed_cidrs: {not: [a list").await.unwrap();

        let result = load_config_file(&path).await;
        assert!(matches!(result, Err(BastionError::Yaml(_))));
    }

    #[test]
    fn test_validate_requires_ingress_mode() {
        let err = validate_config(BastionConfig::default()).unwrap_err();
        assert!(err.to_string().contains("allowed_cidrs or open_to_internet"));
    }

    #[test]
    fn test_validate_rejects_bad_user() {
        let config = BastionConfig {
            open_to_internet: true,
            proxy_user_name: "Bad User".to_string(),
            ..Default::default()
        };
        assert!(validate_config(config).is_err());
    }

    #[tokio::test]
    async fn test_load_validated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bastion.yaml");
        fs::write(&path, "allowed_cidrs:\n  - 203.0.113.0/24\n  - 198.51.100.7/32\n")
            .await
            .unwrap();

        let validated = load_validated(&path).await.unwrap();
        assert_eq!(validated.ingress.rules().len(), 2);
    }
}
