//! Error types for bastion-init

use thiserror::Error;

/// Main error type for bastion-init operations
#[derive(Error, Debug)]
pub enum BastionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Secret '{reference}' could not be resolved: {message}")]
    Secret { reference: String, message: String },

    #[error("Host key error: {0}")]
    HostKey(String),

    #[error("User/group error: {0}")]
    UserGroup(String),

    #[error("Command execution failed: {0}")]
    Command(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },
}

impl BastionError {
    /// Create a secret resolution error
    pub fn secret(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Secret {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a step error
    pub fn step(step: impl ToString, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for BastionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<minijinja::Error> for BastionError {
    fn from(e: minijinja::Error) -> Self {
        Self::Template(e.to_string())
    }
}
