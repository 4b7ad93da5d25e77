use std::sync::Arc;

use chrono::Utc;
use relay_domain::{OAuth2TokenData, SecretNamespace, SecretRef};
use tracing::warn;

use crate::SecretStorage;

/// Storage form of an API key field, used by the settings migration to
/// classify what it is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyStatus {
    /// No key configured
    Unset,
    /// Plaintext key inline in settings
    Plain,
    /// Secret reference that resolves in the store
    Secret,
    /// Secret reference whose value is gone from the store
    MissingSecret,
}

/// Namespaced adapter over the host secret store.
///
/// Three disjoint namespaces: API keys, OAuth token records, OAuth client
/// secrets. A reference minted for one namespace never resolves in
/// another.
#[derive(Clone)]
pub struct SecretStore {
    storage: Arc<dyn SecretStorage>,
}

impl SecretStore {
    pub fn new(storage: Arc<dyn SecretStorage>) -> Self {
        Self { storage }
    }

    /// Allocates a fresh opaque reference in the given namespace
    pub fn create_ref(&self, namespace: SecretNamespace) -> SecretRef {
        SecretRef::generate(namespace)
    }

    fn checked(&self, reference: &SecretRef, namespace: SecretNamespace) -> bool {
        if reference.namespace() == Some(namespace) {
            true
        } else {
            warn!(reference = %reference, expected = namespace.as_str(), "secret reference used in wrong namespace");
            false
        }
    }

    pub async fn set_api_key(&self, reference: &SecretRef, plaintext: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.checked(reference, SecretNamespace::ApiKey),
            "reference {reference} is not in the api-key namespace"
        );
        self.storage.set(reference.as_str(), plaintext).await
    }

    pub async fn get_api_key(&self, reference: &SecretRef) -> anyhow::Result<Option<String>> {
        if !self.checked(reference, SecretNamespace::ApiKey) {
            return Ok(None);
        }
        self.storage.get(reference.as_str()).await
    }

    pub async fn delete_api_key(&self, reference: &SecretRef) -> anyhow::Result<()> {
        if !self.checked(reference, SecretNamespace::ApiKey) {
            return Ok(());
        }
        self.storage.delete(reference.as_str()).await
    }

    pub async fn set_oauth2_token(
        &self,
        reference: &SecretRef,
        record: &OAuth2TokenData,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.checked(reference, SecretNamespace::OAuth2Token),
            "reference {reference} is not in the oauth2-token namespace"
        );
        let json = serde_json::to_string(record)?;
        self.storage.set(reference.as_str(), &json).await
    }

    pub async fn get_oauth2_token(
        &self,
        reference: &SecretRef,
    ) -> anyhow::Result<Option<OAuth2TokenData>> {
        if !self.checked(reference, SecretNamespace::OAuth2Token) {
            return Ok(None);
        }
        let Some(json) = self.storage.get(reference.as_str()).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    pub async fn delete_oauth2_token(&self, reference: &SecretRef) -> anyhow::Result<()> {
        if !self.checked(reference, SecretNamespace::OAuth2Token) {
            return Ok(());
        }
        self.storage.delete(reference.as_str()).await
    }

    pub async fn set_oauth2_client_secret(
        &self,
        reference: &SecretRef,
        plaintext: &str,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.checked(reference, SecretNamespace::OAuth2ClientSecret),
            "reference {reference} is not in the oauth2-client-secret namespace"
        );
        self.storage.set(reference.as_str(), plaintext).await
    }

    pub async fn get_oauth2_client_secret(
        &self,
        reference: &SecretRef,
    ) -> anyhow::Result<Option<String>> {
        if !self.checked(reference, SecretNamespace::OAuth2ClientSecret) {
            return Ok(None);
        }
        self.storage.get(reference.as_str()).await
    }

    pub async fn delete_oauth2_client_secret(&self, reference: &SecretRef) -> anyhow::Result<()> {
        if !self.checked(reference, SecretNamespace::OAuth2ClientSecret) {
            return Ok(());
        }
        self.storage.delete(reference.as_str()).await
    }

    /// True when the record has an expiry closer than `buffer_ms`
    pub fn is_oauth2_token_expired(record: &OAuth2TokenData, buffer_ms: i64) -> bool {
        match record.expires_at {
            Some(expires_at) => expires_at - Utc::now().timestamp_millis() < buffer_ms,
            None => false,
        }
    }

    /// Classifies the storage form of an API key field
    pub async fn get_api_key_status(&self, value: Option<&str>) -> ApiKeyStatus {
        match value {
            None => ApiKeyStatus::Unset,
            Some(value) => match SecretRef::parse(value) {
                None => ApiKeyStatus::Plain,
                Some(reference) => match self.get_api_key(&reference).await {
                    Ok(Some(_)) => ApiKeyStatus::Secret,
                    _ => ApiKeyStatus::MissingSecret,
                },
            },
        }
    }

    /// Every reference currently held by the backing store
    pub async fn stored_refs(&self) -> anyhow::Result<Vec<SecretRef>> {
        let keys = self.storage.keys().await?;
        Ok(keys.iter().filter_map(|key| SecretRef::parse(key)).collect())
    }

    /// Deletes a reference regardless of namespace; used by the orphan
    /// sweep which already verified the reference is unreachable.
    pub async fn delete_ref(&self, reference: &SecretRef) -> anyhow::Result<()> {
        self.storage.delete(reference.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::InMemorySecretStorage;

    fn store() -> SecretStore {
        SecretStore::new(InMemorySecretStorage::new())
    }

    #[tokio::test]
    async fn test_api_key_round_trip() {
        let store = store();
        let reference = store.create_ref(SecretNamespace::ApiKey);

        store.set_api_key(&reference, "sk-test").await.unwrap();
        assert_eq!(
            store.get_api_key(&reference).await.unwrap(),
            Some("sk-test".to_string())
        );

        store.delete_api_key(&reference).await.unwrap();
        assert_eq!(store.get_api_key(&reference).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespaces_do_not_cross_resolve() {
        let store = store();
        let reference = store.create_ref(SecretNamespace::ApiKey);
        store.set_api_key(&reference, "sk-test").await.unwrap();

        // Same reference string cannot resolve as a token record
        assert_eq!(store.get_oauth2_token(&reference).await.unwrap(), None);
        assert_eq!(
            store.get_oauth2_client_secret(&reference).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_token_record_round_trip() {
        let store = store();
        let reference = store.create_ref(SecretNamespace::OAuth2Token);
        let record = OAuth2TokenData::bearer("t1".to_string(), Some(3600)).refresh_token("r1".to_string());

        store.set_oauth2_token(&reference, &record).await.unwrap();
        assert_eq!(
            store.get_oauth2_token(&reference).await.unwrap(),
            Some(record)
        );
    }

    #[test]
    fn test_expiry_predicate() {
        let fresh = OAuth2TokenData::bearer("t".to_string(), Some(3600));
        assert!(!SecretStore::is_oauth2_token_expired(&fresh, 300_000));
        // Inside the buffer window
        assert!(SecretStore::is_oauth2_token_expired(&fresh, 3_700_000));

        let long_lived = OAuth2TokenData::bearer("t".to_string(), None);
        assert!(!SecretStore::is_oauth2_token_expired(&long_lived, i64::MAX));
    }

    #[tokio::test]
    async fn test_api_key_status_classification() {
        let store = store();

        assert_eq!(store.get_api_key_status(None).await, ApiKeyStatus::Unset);
        assert_eq!(
            store.get_api_key_status(Some("sk-plain")).await,
            ApiKeyStatus::Plain
        );

        let reference = store.create_ref(SecretNamespace::ApiKey);
        assert_eq!(
            store.get_api_key_status(Some(reference.as_str())).await,
            ApiKeyStatus::MissingSecret
        );

        store.set_api_key(&reference, "sk").await.unwrap();
        assert_eq!(
            store.get_api_key_status(Some(reference.as_str())).await,
            ApiKeyStatus::Secret
        );
    }
}
