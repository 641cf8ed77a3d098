//! AWS Secrets Manager Agent client
//!
//! The agent runs on the instance and exposes a local HTTP endpoint that
//! fetches (and caches) secrets with the instance role's credentials, so no
//! request signing happens here.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use super::{SecretRef, SecretStore};
use crate::BastionError;

/// Default agent endpoint
pub const AGENT_BASE_URL: &str = "http://localhost:2773";

/// File the agent writes its SSRF token to
pub const AGENT_TOKEN_FILE: &str = "/var/run/awssmatoken";

/// Header carrying the SSRF token
const TOKEN_HEADER: &str = "X-Aws-Parameters-Secrets-Token";

#[derive(Debug, Deserialize)]
struct GetSecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
}

/// Client for the local Secrets Manager agent
pub struct SecretsAgent {
    client: Client,
    base_url: String,
    token: String,
}

impl SecretsAgent {
    /// Create a client for the agent at `base_url` using `token`
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, BastionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(2))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Create a client reading the SSRF token from `token_file`
    pub async fn from_token_file(
        base_url: impl Into<String>,
        token_file: impl AsRef<Path>,
    ) -> Result<Self, BastionError> {
        let token_file = token_file.as_ref();
        let token = fs::read_to_string(token_file).await.map_err(|e| {
            BastionError::Config(format!(
                "Cannot read secrets agent token {}: {}",
                token_file.display(),
                e
            ))
        })?;
        Self::new(base_url, token.trim())
    }

    fn request_url(&self, secret_id: &str) -> Result<Url, BastionError> {
        Url::parse_with_params(
            &format!("{}/secretsmanager/get", self.base_url),
            &[("secretId", secret_id)],
        )
        .map_err(|e| BastionError::Config(format!("Invalid secrets agent URL: {}", e)))
    }
}

#[async_trait]
impl SecretStore for SecretsAgent {
    fn name(&self) -> &'static str {
        "secrets-manager-agent"
    }

    async fn get_secret(&self, reference: &SecretRef) -> Result<String, BastionError> {
        let SecretRef::Managed(secret_id) = reference else {
            return Err(BastionError::secret(
                reference.to_string(),
                "not a Secrets Manager reference",
            ));
        };

        debug!("Fetching secret {} from agent", secret_id);
        let response = self
            .client
            .get(self.request_url(secret_id)?)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BastionError::secret(
                secret_id.as_str(),
                format!("agent returned {}: {}", status, body.trim()),
            ));
        }

        let body: GetSecretValueResponse = response.json().await?;
        body.secret_string
            .ok_or_else(|| BastionError::secret(secret_id.as_str(), "secret has no SecretString"))
    }
}
