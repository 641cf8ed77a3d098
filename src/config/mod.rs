//! Bastion configuration types
//!
//! [`BastionConfig`] is the deployment-time description of one bastion, read
//! from YAML. [`ProvisionerConfig`] is the boot-time input of the key
//! provisioner, derived either from a `BastionConfig` or from command line
//! flags and environment variables.

pub mod loader;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::BastionError;
use crate::secrets::SecretRef;

/// Default proxy user name
pub const DEFAULT_PROXY_USER: &str = "proxyuser";

/// Default instance type
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.nano";

/// Default machine image
pub const DEFAULT_MACHINE_IMAGE: &str = "amazon-linux-2023";

/// Deployment configuration for one bastion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfig {
    /// VPC to deploy into
    pub vpc_id: Option<String>,

    /// Instance type (default: t3.nano)
    pub instance_type: String,

    /// Machine image (default: latest Amazon Linux 2023)
    pub machine_image: String,

    /// EC2 key pair for the image's default user
    pub key_name: Option<String>,

    /// CIDRs allowed to reach port 22
    pub allowed_cidrs: Vec<String>,

    /// Allow port 22 from anywhere when no CIDRs are given
    pub open_to_internet: bool,

    /// OpenSSH public key lines; keys `ssh-keygen -l` rejects are skipped
    pub public_keys: Vec<String>,

    /// Proxy user name; must differ from the image's default user
    pub proxy_user_name: String,

    /// Give the proxy user an interactive shell
    pub allow_shell: bool,

    /// Let the proxy user reach the instance metadata service
    pub allow_metadata_service_access: bool,

    /// Secret holding the Ed25519 host private key
    pub ed25519_host_key_secret: Option<String>,

    /// Secret holding the ECDSA host private key
    pub ecdsa_host_key_secret: Option<String>,
}

impl Default for BastionConfig {
    fn default() -> Self {
        Self {
            vpc_id: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            machine_image: DEFAULT_MACHINE_IMAGE.to_string(),
            key_name: None,
            allowed_cidrs: Vec::new(),
            open_to_internet: false,
            public_keys: Vec::new(),
            proxy_user_name: DEFAULT_PROXY_USER.to_string(),
            allow_shell: false,
            allow_metadata_service_access: false,
            ed25519_host_key_secret: None,
            ecdsa_host_key_secret: None,
        }
    }
}

impl BastionConfig {
    /// Parse a bastion config from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, BastionError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Boot-time provisioner input for this bastion
    ///
    /// Public keys are base64-encoded one by one so they survive being
    /// space-joined into a shell variable.
    pub fn provisioner_config(&self) -> Result<ProvisionerConfig, BastionError> {
        let config = ProvisionerConfig {
            proxy_user: self.proxy_user_name.clone(),
            allow_shell: self.allow_shell,
            block_metadata_service: !self.allow_metadata_service_access,
            public_keys: self
                .public_keys
                .iter()
                .map(|key| key.trim())
                .filter(|key| !key.is_empty())
                .map(|key| BASE64.encode(key))
                .collect(),
            ed25519_host_key: SecretRef::parse_optional(self.ed25519_host_key_secret.as_deref())?,
            ecdsa_host_key: SecretRef::parse_optional(self.ecdsa_host_key_secret.as_deref())?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Boot-time input of the key provisioner, fixed for the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Proxy user account name
    pub proxy_user: String,
    /// `true` keeps the image default shell, `false` uses `/sbin/nologin`
    pub allow_shell: bool,
    /// Drop metadata-service traffic from every non-root process
    pub block_metadata_service: bool,
    /// Base64-encoded candidate public keys, in input order
    pub public_keys: Vec<String>,
    pub ed25519_host_key: Option<SecretRef>,
    pub ecdsa_host_key: Option<SecretRef>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            proxy_user: DEFAULT_PROXY_USER.to_string(),
            allow_shell: false,
            block_metadata_service: false,
            public_keys: Vec::new(),
            ed25519_host_key: None,
            ecdsa_host_key: None,
        }
    }
}

impl ProvisionerConfig {
    /// Split a space-joined list of base64 keys, ignoring empty tokens
    pub fn split_public_keys(joined: &str) -> Vec<String> {
        joined.split_whitespace().map(str::to_string).collect()
    }

    /// Whether any host key is to be rotated
    pub fn has_host_keys(&self) -> bool {
        self.ed25519_host_key.is_some() || self.ecdsa_host_key.is_some()
    }

    /// Check the proxy user name
    pub fn validate(&self) -> Result<(), BastionError> {
        validate_user_name(&self.proxy_user)
    }
}

/// Check that `name` is a portable POSIX user name
pub fn validate_user_name(name: &str) -> Result<(), BastionError> {
    if name.is_empty() {
        return Err(BastionError::Config("proxy user name is empty".to_string()));
    }
    if name.len() > 32 {
        return Err(BastionError::Config(format!(
            "proxy user name '{}' is longer than 32 characters",
            name
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let rest_ok =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if !first_ok || !rest_ok {
        return Err(BastionError::Config(format!(
            "invalid proxy user name '{}'",
            name
        )));
    }
    Ok(())
}
