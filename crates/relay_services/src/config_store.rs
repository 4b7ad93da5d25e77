use std::collections::HashSet;
use std::sync::Mutex;

use relay_domain::{AuthConfig, EventEmitter, ProviderConfig, SecretRef, Subscription};
use tracing::{debug, warn};

use crate::taxonomy::{self, ImportOptions};
use crate::SecretStore;

/// What changed in the configuration surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// The provider list or a provider's contents changed
    Providers,
    /// The "store secrets inline" mode flag flipped
    Mode,
}

struct State {
    providers: Vec<ProviderConfig>,
    store_secrets_in_settings: bool,
}

/// Ordered set of provider configs plus the secret-storage mode flag.
///
/// Auth-method providers write back derived fields through `update_auth`;
/// the host settings UI goes through the same operations. Order is stable:
/// providers keep their position across updates.
pub struct ConfigStore {
    state: Mutex<State>,
    secrets: SecretStore,
    changed: EventEmitter<ConfigChange>,
}

impl ConfigStore {
    pub fn new(secrets: SecretStore) -> Self {
        Self {
            state: Mutex::new(State { providers: Vec::new(), store_secrets_in_settings: false }),
            secrets,
            changed: EventEmitter::new(),
        }
    }

    /// Seeds the store from host settings and sweeps orphaned references
    pub async fn startup(&self, providers: Vec<ProviderConfig>, store_secrets_in_settings: bool) {
        {
            let mut state = self.state.lock().unwrap();
            state.providers = providers;
            state.store_secrets_in_settings = store_secrets_in_settings;
        }
        self.sweep_orphans().await;
        self.changed.emit(&ConfigChange::Providers);
    }

    pub fn on_change(
        &self,
        handler: impl Fn(&ConfigChange) + Send + Sync + 'static,
    ) -> Subscription<ConfigChange> {
        self.changed.subscribe(handler)
    }

    pub fn store_secrets_in_settings(&self) -> bool {
        self.state.lock().unwrap().store_secrets_in_settings
    }

    pub fn list(&self) -> Vec<ProviderConfig> {
        self.state.lock().unwrap().providers.clone()
    }

    pub fn find(&self, name: &str) -> Option<ProviderConfig> {
        self.state
            .lock()
            .unwrap()
            .providers
            .iter()
            .find(|provider| provider.name == name)
            .cloned()
    }

    /// Appends a provider, rejecting duplicate names
    pub fn add(&self, provider: ProviderConfig) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        anyhow::ensure!(
            !state.providers.iter().any(|p| p.name == provider.name),
            "provider {} already exists",
            provider.name
        );
        state.providers.push(provider);
        drop(state);
        self.changed.emit(&ConfigChange::Providers);
        Ok(())
    }

    /// Replaces a provider in place, preserving its list position
    pub fn update(&self, provider: ProviderConfig) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let slot = state
                .providers
                .iter_mut()
                .find(|p| p.name == provider.name)
                .ok_or_else(|| anyhow::anyhow!("provider {} not found", provider.name))?;
            *slot = provider;
        }
        self.changed.emit(&ConfigChange::Providers);
        Ok(())
    }

    /// Writes a provider's auth config back.
    ///
    /// On a method change the old method's `cleanup_on_discard` runs before
    /// the new config is stored, releasing any secrets the old config held.
    pub async fn update_auth(&self, name: &str, auth: AuthConfig) -> anyhow::Result<()> {
        let old = self
            .find(name)
            .ok_or_else(|| anyhow::anyhow!("provider {name} not found"))?
            .auth;

        if old.method() != auth.method() {
            debug!(provider = name, old = %old.method(), new = %auth.method(), "auth method changed");
            (taxonomy::ops_for(old.method()).cleanup_on_discard)(&old, &self.secrets)
                .await
                .unwrap_or_else(|error| {
                    warn!(provider = name, %error, "cleanup of discarded auth config failed")
                });
        }

        {
            let mut state = self.state.lock().unwrap();
            let slot = state
                .providers
                .iter_mut()
                .find(|p| p.name == name)
                .ok_or_else(|| anyhow::anyhow!("provider {name} not found"))?;
            slot.auth = auth;
        }
        self.changed.emit(&ConfigChange::Providers);
        Ok(())
    }

    /// Removes a provider, releasing the secrets its auth config held
    pub async fn remove(&self, name: &str) -> anyhow::Result<()> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let index = state
                .providers
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| anyhow::anyhow!("provider {name} not found"))?;
            state.providers.remove(index)
        };

        (taxonomy::ops_for(removed.auth.method()).cleanup_on_discard)(&removed.auth, &self.secrets)
            .await
            .unwrap_or_else(|error| {
                warn!(provider = name, %error, "cleanup of removed provider failed")
            });
        self.changed.emit(&ConfigChange::Providers);
        Ok(())
    }

    /// Flips the mode flag, migrating every provider's auth config to the
    /// new storage form and sweeping references that became orphaned.
    pub async fn set_store_secrets_in_settings(&self, inline: bool) {
        let (changed, providers) = {
            let mut state = self.state.lock().unwrap();
            let changed = state.store_secrets_in_settings != inline;
            state.store_secrets_in_settings = inline;
            (changed, state.providers.clone())
        };
        if !changed {
            return;
        }

        for provider in providers {
            let mut auth = provider.auth.clone();
            let ops = taxonomy::ops_for(auth.method());
            // Only methods that allow inline material migrate; OAuth tokens
            // stay referenced either way.
            let target_inline = inline && ops.supports_sensitive_data_in_settings;
            let options = ImportOptions {
                store: &self.secrets,
                store_secrets_in_settings: target_inline,
                existing: Some(&provider.auth),
            };
            match (ops.normalize_on_import)(&mut auth, options).await {
                Ok(()) => {
                    if auth != provider.auth {
                        let mut state = self.state.lock().unwrap();
                        if let Some(slot) =
                            state.providers.iter_mut().find(|p| p.name == provider.name)
                        {
                            slot.auth = auth;
                        }
                    }
                }
                Err(error) => {
                    warn!(provider = %provider.name, %error, "secret-storage migration failed")
                }
            }
        }

        self.sweep_orphans().await;
        self.changed.emit(&ConfigChange::Mode);
        self.changed.emit(&ConfigChange::Providers);
    }

    /// Deletes stored references that no provider config mentions.
    ///
    /// Runs at startup and after mode flips; idempotent.
    pub async fn sweep_orphans(&self) {
        let live: HashSet<SecretRef> = self
            .list()
            .iter()
            .flat_map(|provider| taxonomy::collect_refs(&provider.auth))
            .collect();

        let stored = match self.secrets.stored_refs().await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(%error, "listing stored secrets failed; skipping orphan sweep");
                return;
            }
        };

        for reference in stored {
            if !live.contains(&reference) {
                debug!(%reference, "deleting orphaned secret reference");
                if let Err(error) = self.secrets.delete_ref(&reference).await {
                    warn!(%reference, %error, "deleting orphaned secret failed");
                }
            }
        }
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use relay_domain::{ApiKeyAuth, SecretNamespace};

    use super::*;
    use crate::InMemorySecretStorage;

    fn store() -> ConfigStore {
        ConfigStore::new(SecretStore::new(InMemorySecretStorage::new()))
    }

    fn api_key_provider(name: &str, key: Option<&str>) -> ProviderConfig {
        ProviderConfig::new(
            name,
            "https://api.example",
            AuthConfig::ApiKey(ApiKeyAuth { label: None, api_key: key.map(str::to_string) }),
        )
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_names() {
        let config = store();
        config.add(api_key_provider("X", None)).unwrap();
        assert!(config.add(api_key_provider("X", None)).is_err());
    }

    #[tokio::test]
    async fn test_order_is_stable_across_updates() {
        let config = store();
        config.add(api_key_provider("A", None)).unwrap();
        config.add(api_key_provider("B", None)).unwrap();
        config.add(api_key_provider("C", None)).unwrap();

        config.update(api_key_provider("B", Some("sk"))).unwrap();

        let names: Vec<String> = config.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_method_change_releases_old_secrets() {
        let config = store();
        let reference = config.secrets().create_ref(SecretNamespace::ApiKey);
        config
            .secrets()
            .set_api_key(&reference, "sk")
            .await
            .unwrap();
        config
            .add(api_key_provider("X", Some(reference.as_str())))
            .unwrap();

        config.update_auth("X", AuthConfig::None).await.unwrap();

        assert_eq!(config.secrets().get_api_key(&reference).await.unwrap(), None);
        assert_eq!(config.find("X").unwrap().auth, AuthConfig::None);
    }

    #[tokio::test]
    async fn test_mode_flip_moves_keys_into_store() {
        let config = store();
        config.add(api_key_provider("X", Some("sk-inline"))).unwrap();

        // Start inline, flip to referenced
        config.set_store_secrets_in_settings(true).await;
        config.set_store_secrets_in_settings(false).await;

        let AuthConfig::ApiKey(api) = config.find("X").unwrap().auth else { panic!() };
        let value = api.api_key.unwrap();
        assert!(SecretRef::is_reference(&value));
        let reference = SecretRef::parse(&value).unwrap();
        assert_eq!(
            config.secrets().get_api_key(&reference).await.unwrap(),
            Some("sk-inline".to_string())
        );
    }

    #[tokio::test]
    async fn test_sweep_orphans_is_idempotent() {
        let config = store();
        let orphan = config.secrets().create_ref(SecretNamespace::ApiKey);
        config.secrets().set_api_key(&orphan, "sk").await.unwrap();

        let live_ref = config.secrets().create_ref(SecretNamespace::ApiKey);
        config.secrets().set_api_key(&live_ref, "sk2").await.unwrap();
        config
            .add(api_key_provider("X", Some(live_ref.as_str())))
            .unwrap();

        config.sweep_orphans().await;
        config.sweep_orphans().await;

        assert_eq!(config.secrets().get_api_key(&orphan).await.unwrap(), None);
        assert_eq!(
            config.secrets().get_api_key(&live_ref).await.unwrap(),
            Some("sk2".to_string())
        );
    }

    #[tokio::test]
    async fn test_change_events_fire() {
        let config = store();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = config.on_change(move |change| {
            seen_clone.lock().unwrap().push(*change);
        });

        config.add(api_key_provider("X", None)).unwrap();
        config.set_store_secrets_in_settings(true).await;

        let events = seen.lock().unwrap().clone();
        assert!(events.contains(&ConfigChange::Providers));
        assert!(events.contains(&ConfigChange::Mode));
    }
}
