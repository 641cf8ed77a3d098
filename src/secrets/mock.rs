//! Mock secret store for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{SecretRef, SecretStore};
use crate::BastionError;

/// Mock secret store
///
/// # Example
/// ```
/// use bastion_init::secrets::mock::MockSecretStore;
///
/// let store = MockSecretStore::new().with_secret("bastion/ed25519", "PRIVATE KEY");
/// ```
#[derive(Default)]
pub struct MockSecretStore {
    secrets: HashMap<String, String>,
    lookups: Mutex<Vec<String>>,
}

impl MockSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value for a reference (matched on its display form)
    pub fn with_secret(mut self, reference: &str, value: &str) -> Self {
        self.secrets.insert(reference.to_string(), value.to_string());
        self
    }

    /// References looked up so far, in order
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_secret(&self, reference: &SecretRef) -> Result<String, BastionError> {
        let key = reference.to_string();
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.push(key.clone());
        }

        self.secrets
            .get(&key)
            .cloned()
            .ok_or_else(|| BastionError::secret(key, "secret not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_store_known_and_unknown() {
        let store = MockSecretStore::new().with_secret("env:KEY", "value");

        let value = store
            .get_secret(&SecretRef::Env("KEY".to_string()))
            .await
            .unwrap();
        assert_eq!(value, "value");

        let missing = store
            .get_secret(&SecretRef::Managed("other".to_string()))
            .await;
        assert!(missing.is_err());
        assert_eq!(store.lookups(), vec!["env:KEY", "other"]);
    }
}
