use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use relay_domain::{
    AuthConfig, AuthCredential, AuthStatus, AuthStatusEvent, LastError, Subscription,
    stable_signature,
};
use tracing::{debug, warn};

use crate::methods::{AuthMethodProvider, MethodDeps, MethodProvider};
use crate::ConfigStore;

type CredentialFuture = Shared<BoxFuture<'static, Option<AuthCredential>>>;

struct Entry {
    provider: Arc<MethodProvider>,
    /// Stable serialization of the auth config this instance was built from
    signature: String,
    refresh_timer: Option<tokio::task::JoinHandle<()>>,
    _status_subscription: Subscription<AuthStatusEvent>,
}

#[derive(Default)]
struct ManagerState {
    /// Keyed `providerName:method`
    entries: HashMap<String, Entry>,
    /// Coalesced credential lookups, keyed like `entries`
    in_flight_credentials: HashMap<String, CredentialFuture>,
    /// Keys with a refresh currently running
    refresh_in_flight: HashSet<String>,
    /// Keyed by provider name
    last_errors: HashMap<String, LastError>,
    /// Monotonic per-key counters invalidating stale scheduled work
    generations: HashMap<String, u64>,
}

/// The credential lifecycle engine.
///
/// Caches one method-provider instance per `(provider, method)`, watches
/// its status stream, schedules proactive refresh ahead of expiry, and
/// coalesces concurrent credential lookups. The credential returned by
/// [`AuthManager::get_credential`] is either currently valid (expiry
/// outside the method's buffer) or absent with `last_error` recorded.
pub struct AuthManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: Arc<ConfigStore>,
    deps: MethodDeps,
    state: Mutex<ManagerState>,
}

fn entry_key(provider_name: &str, method: relay_domain::AuthMethodKind) -> String {
    format!("{provider_name}:{method}")
}

fn name_of_key(key: &str) -> &str {
    key.rsplit_once(':').map(|(name, _)| name).unwrap_or(key)
}

impl AuthManager {
    pub fn new(config: Arc<ConfigStore>, deps: MethodDeps) -> Self {
        Self {
            inner: Arc::new(ManagerInner { config, deps, state: Mutex::new(ManagerState::default()) }),
        }
    }

    /// Resolves the method provider for a named provider config.
    ///
    /// Returns `None` when the provider does not exist or its method is
    /// `none`.
    pub fn get_provider(&self, name: &str) -> Option<Arc<MethodProvider>> {
        let auth = self.inner.config.find(name)?.auth;
        self.get_provider_with_auth(name, &auth)
    }

    /// Resolves the provider for a specific auth config, creating or
    /// recreating the cache entry as needed.
    pub fn get_provider_with_auth(
        &self,
        name: &str,
        auth: &AuthConfig,
    ) -> Option<Arc<MethodProvider>> {
        if auth.method() == relay_domain::AuthMethodKind::None {
            return None;
        }
        let key = entry_key(name, auth.method());
        let signature = stable_signature(auth);

        {
            let mut state = self.inner.state.lock().unwrap();

            // At most one active method per provider: entries for the same
            // name with a different method go first.
            let stale: Vec<String> = state
                .entries
                .keys()
                .filter(|entry| name_of_key(entry) == name && **entry != key)
                .cloned()
                .collect();
            for stale_key in stale {
                ManagerInner::dispose_entry_locked(&mut state, &stale_key);
            }

            match state.entries.get(&key) {
                Some(entry) if entry.signature == signature => {
                    return Some(entry.provider.clone());
                }
                Some(_) => {
                    debug!(key, "auth config changed; recreating provider");
                    ManagerInner::dispose_entry_locked(&mut state, &key);
                }
                None => {}
            }
        }

        let provider = match MethodProvider::try_new(name, auth, self.inner.deps.clone()) {
            Ok(Some(provider)) => Arc::new(provider),
            Ok(None) => return None,
            Err(error) => {
                warn!(provider = name, %error, "instantiating auth method failed");
                self.inner.state.lock().unwrap().last_errors.insert(
                    name.to_string(),
                    LastError {
                        error: error.to_string(),
                        error_type: relay_domain::AuthErrorType::UnknownError,
                    },
                );
                return None;
            }
        };

        let subscription = self
            .inner
            .subscribe_status(&key, name, &provider);

        let mut state = self.inner.state.lock().unwrap();
        state.entries.insert(
            key,
            Entry {
                provider: provider.clone(),
                signature,
                refresh_timer: None,
                _status_subscription: subscription,
            },
        );
        Some(provider)
    }

    /// Resolves a usable credential for the named provider.
    ///
    /// Concurrent callers for the same key share one in-flight resolution.
    pub async fn get_credential(&self, name: &str) -> Option<AuthCredential> {
        let Some(config) = self.inner.config.find(name) else {
            self.inner.state.lock().unwrap().last_errors.insert(
                name.to_string(),
                LastError {
                    error: format!("provider {name} is not configured"),
                    error_type: relay_domain::AuthErrorType::UnknownError,
                },
            );
            return None;
        };
        if config.auth.method() == relay_domain::AuthMethodKind::None {
            return None;
        }

        let provider = self.get_provider_with_auth(name, &config.auth)?;
        let key = entry_key(name, config.auth.method());

        // Coalesce with an already-running lookup
        let existing = {
            let state = self.inner.state.lock().unwrap();
            state.in_flight_credentials.get(&key).cloned()
        };
        if let Some(future) = existing {
            return future.await;
        }

        let future: CredentialFuture = {
            let inner = self.inner.clone();
            let key = key.clone();
            let name = name.to_string();
            let provider = provider.clone();
            async move {
                let credential = provider.get_credential().await;
                if let Some(credential) = &credential {
                    inner.state.lock().unwrap().last_errors.remove(&name);
                    if let Some(expires_at) = credential.expires_at {
                        inner.schedule_refresh(&key, &provider, expires_at, None);
                    }
                }
                credential
            }
            .boxed()
            .shared()
        };

        self.inner
            .state
            .lock()
            .unwrap()
            .in_flight_credentials
            .insert(key.clone(), future.clone());

        // The in-flight slot is cleared even when the await is cancelled
        let _clear = ClearInFlight { inner: self.inner.clone(), key };
        future.await
    }

    /// User-initiated refresh; not bound by the scheduler's generation.
    pub async fn retry_refresh(&self, name: &str) -> bool {
        let Some(provider) = self.get_provider(name) else { return false };
        let key = {
            let state = self.inner.state.lock().unwrap();
            state
                .entries
                .iter()
                .find(|(key, entry)| {
                    name_of_key(key) == name && Arc::ptr_eq(&entry.provider, &provider)
                })
                .map(|(key, _)| key.clone())
        };
        let Some(key) = key else { return false };
        self.inner.run_refresh(&key, &provider, None).await
    }

    /// Cancels any scheduled refresh for the named provider
    pub fn cancel_refresh(&self, name: &str) {
        let mut state = self.inner.state.lock().unwrap();
        for (key, entry) in state.entries.iter_mut() {
            if name_of_key(key) == name
                && let Some(timer) = entry.refresh_timer.take()
            {
                timer.abort();
            }
        }
    }

    /// Disposes the cache entries for one provider, invalidating any
    /// in-flight refresh against them.
    pub fn clear_provider(&self, name: &str) {
        let mut state = self.inner.state.lock().unwrap();
        let keys: Vec<String> = state
            .entries
            .keys()
            .filter(|key| name_of_key(key) == name)
            .cloned()
            .collect();
        for key in keys {
            ManagerInner::dispose_entry_locked(&mut state, &key);
        }
        state.last_errors.remove(name);
    }

    /// Disposes every cache entry. Idempotent.
    pub fn clear_all(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in keys {
            ManagerInner::dispose_entry_locked(&mut state, &key);
        }
        state.last_errors.clear();
    }

    pub fn dispose(&self) {
        self.clear_all();
    }

    /// Last failure recorded for a provider, for UI surfacing
    pub fn get_last_error(&self, name: &str) -> Option<LastError> {
        self.inner.state.lock().unwrap().last_errors.get(name).cloned()
    }

    /// The methods currently cached for a provider. At most one by
    /// construction; exposed for the host status UI.
    pub fn cached_methods(&self, name: &str) -> Vec<relay_domain::AuthMethodKind> {
        let state = self.inner.state.lock().unwrap();
        state
            .entries
            .iter()
            .filter(|(key, _)| name_of_key(key) == name)
            .map(|(_, entry)| entry.provider.definition().id)
            .collect()
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.inner.state.lock().unwrap().entries.len()
    }

    #[cfg(test)]
    fn generation(&self, key: &str) -> u64 {
        *self
            .inner
            .state
            .lock()
            .unwrap()
            .generations
            .get(key)
            .unwrap_or(&0)
    }
}

/// Removes the in-flight credential slot on every exit path
struct ClearInFlight {
    inner: Arc<ManagerInner>,
    key: String,
}

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        self.inner
            .state
            .lock()
            .unwrap()
            .in_flight_credentials
            .remove(&self.key);
    }
}

impl ManagerInner {
    /// Disposes one entry under the lock: bumps the generation first so any
    /// racing scheduled refresh becomes a no-op, then tears down the timer
    /// and subscription.
    fn dispose_entry_locked(state: &mut ManagerState, key: &str) {
        *state.generations.entry(key.to_string()).or_insert(0) += 1;
        if let Some(mut entry) = state.entries.remove(key) {
            if let Some(timer) = entry.refresh_timer.take() {
                timer.abort();
            }
            // Subscription drops with the entry
        }
        state.in_flight_credentials.remove(key);
        state.refresh_in_flight.remove(key);
    }

    fn generation_of(&self, key: &str) -> u64 {
        *self.state.lock().unwrap().generations.get(key).unwrap_or(&0)
    }

    fn is_current_provider(&self, key: &str, provider: &Arc<MethodProvider>) -> bool {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(key)
            .map(|entry| Arc::ptr_eq(&entry.provider, provider))
            .unwrap_or(false)
    }

    /// Wires a provider's status stream into manager state.
    fn subscribe_status(
        self: &Arc<Self>,
        key: &str,
        name: &str,
        provider: &Arc<MethodProvider>,
    ) -> Subscription<AuthStatusEvent> {
        let weak_inner: Weak<ManagerInner> = Arc::downgrade(self);
        let weak_provider = Arc::downgrade(provider);
        let key = key.to_string();
        let name = name.to_string();

        provider.on_status().subscribe(move |event: &AuthStatusEvent| {
            let Some(inner) = weak_inner.upgrade() else { return };
            let Some(provider) = weak_provider.upgrade() else { return };
            // Ignore events from a disposed-and-replaced instance
            if !inner.is_current_provider(&key, &provider) {
                return;
            }

            match event.status {
                AuthStatus::Expired | AuthStatus::Error => {
                    let mut state = inner.state.lock().unwrap();
                    state.last_errors.insert(
                        name.clone(),
                        LastError {
                            error: event.error.clone().unwrap_or_default(),
                            error_type: event
                                .error_type
                                .unwrap_or(relay_domain::AuthErrorType::UnknownError),
                        },
                    );
                    if let Some(entry) = state.entries.get_mut(&key)
                        && let Some(timer) = entry.refresh_timer.take()
                    {
                        timer.abort();
                    }
                }
                AuthStatus::Valid => {
                    inner.state.lock().unwrap().last_errors.remove(&name);
                    // Re-arm the refresh timer from the fresh expiry
                    let inner = inner.clone();
                    let key = key.clone();
                    tokio::spawn(async move {
                        if let Some(expires_at) = provider.current_expiry().await {
                            inner.schedule_refresh(&key, &provider, expires_at, None);
                        }
                    });
                }
                AuthStatus::Revoked => {
                    inner.state.lock().unwrap().last_errors.remove(&name);
                }
            }
        })
    }

    /// Arms the refresh timer for `expires_at − buffer`, replacing any
    /// existing timer for the key. No-op for providers without refresh.
    fn schedule_refresh(
        self: &Arc<Self>,
        key: &str,
        provider: &Arc<MethodProvider>,
        expires_at: i64,
        expected_generation: Option<u64>,
    ) {
        if !provider.supports_refresh() {
            return;
        }

        let generation = expected_generation.unwrap_or_else(|| self.generation_of(key));
        let buffer_ms = provider.expiry_buffer().as_millis() as i64;
        let delay_ms = (expires_at - Utc::now().timestamp_millis() - buffer_ms).max(0) as u64;

        let inner = self.clone();
        let timer_key = key.to_string();
        let timer_provider = provider.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            if inner.generation_of(&timer_key) != generation
                || !inner.is_current_provider(&timer_key, &timer_provider)
            {
                debug!(key = timer_key, "scheduled refresh superseded; skipping");
                return;
            }
            inner
                .run_refresh(&timer_key, &timer_provider, Some(generation))
                .await;
        });

        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(key) {
            if let Some(previous) = entry.refresh_timer.take() {
                previous.abort();
            }
            entry.refresh_timer = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Runs one refresh for a key, guarded by the refresh singleton and,
    /// for scheduler-initiated runs, the generation counter.
    async fn run_refresh(
        self: &Arc<Self>,
        key: &str,
        provider: &Arc<MethodProvider>,
        expected_generation: Option<u64>,
    ) -> bool {
        if let Some(generation) = expected_generation {
            if self.generation_of(key) != generation || !self.is_current_provider(key, provider) {
                return false;
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            if !state.refresh_in_flight.insert(key.to_string()) {
                warn!(key, "refresh already in flight; skipping");
                return false;
            }
        }
        let _clear = ClearRefreshInFlight { inner: self.clone(), key: key.to_string() };

        let refreshed = provider.refresh().await;

        if refreshed {
            self.state
                .lock()
                .unwrap()
                .last_errors
                .remove(name_of_key(key));
            if let Some(generation) = expected_generation {
                if self.generation_of(key) == generation
                    && let Some(expires_at) = provider.current_expiry().await
                {
                    self.schedule_refresh(key, provider, expires_at, Some(generation));
                }
            } else if let Some(expires_at) = provider.current_expiry().await {
                self.schedule_refresh(key, provider, expires_at, None);
            }
        } else {
            // The provider already fired status; just stand down the timer
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.entries.get_mut(key)
                && let Some(timer) = entry.refresh_timer.take()
            {
                timer.abort();
            }
        }
        refreshed
    }
}

struct ClearRefreshInFlight {
    inner: Arc<ManagerInner>,
    key: String,
}

impl Drop for ClearRefreshInFlight {
    fn drop(&mut self) {
        self.inner
            .state
            .lock()
            .unwrap()
            .refresh_in_flight
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use relay_domain::{ApiKeyAuth, AuthMethodKind, ProviderConfig};

    use super::*;
    use crate::methods::MethodDeps;
    use crate::{
        InMemorySecretStorage, OAuthHttp, ScriptedHost, SecretStore, UriCallbackBridge,
    };

    fn manager() -> (AuthManager, Arc<ConfigStore>) {
        let secrets = SecretStore::new(InMemorySecretStorage::new());
        let config = Arc::new(ConfigStore::new(secrets.clone()));
        let deps = MethodDeps {
            secrets,
            config: config.clone(),
            host: ScriptedHost::new(),
            bridge: Arc::new(UriCallbackBridge::new("editor://relay.gateway/callback")),
            http: OAuthHttp::new(reqwest::Client::new()),
        };
        (AuthManager::new(config.clone(), deps), config)
    }

    fn api_key_provider(name: &str, key: &str) -> ProviderConfig {
        ProviderConfig::new(
            name,
            "https://api.example",
            AuthConfig::ApiKey(ApiKeyAuth { label: None, api_key: Some(key.to_string()) }),
        )
    }

    #[tokio::test]
    async fn test_get_credential_api_key() {
        let (manager, config) = manager();
        config.add(api_key_provider("X", "sk-test")).unwrap();

        let credential = manager.get_credential("X").await.unwrap();
        assert_eq!(credential.value, "sk-test");
        assert_eq!(manager.get_last_error("X"), None);
    }

    #[tokio::test]
    async fn test_missing_provider_records_last_error() {
        let (manager, _) = manager();

        assert_eq!(manager.get_credential("nope").await, None);
        assert!(manager.get_last_error("nope").is_some());
    }

    #[tokio::test]
    async fn test_provider_instance_is_cached() {
        let (manager, config) = manager();
        config.add(api_key_provider("X", "sk")).unwrap();

        let first = manager.get_provider("X").unwrap();
        let second = manager.get_provider("X").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_signature_change_recreates_entry() {
        let (manager, config) = manager();
        config.add(api_key_provider("X", "sk-1")).unwrap();

        let first = manager.get_provider("X").unwrap();
        let key = entry_key("X", AuthMethodKind::ApiKey);
        let generation_before = manager.generation(&key);

        config
            .update(api_key_provider("X", "sk-2"))
            .unwrap();

        let second = manager.get_provider("X").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(manager.generation(&key) > generation_before);
        assert_eq!(manager.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_method_none_returns_absent() {
        let (manager, config) = manager();
        config
            .add(ProviderConfig::new("X", "https://api.example", AuthConfig::None))
            .unwrap();

        assert!(manager.get_provider("X").is_none());
        assert_eq!(manager.get_credential("X").await, None);
    }

    #[tokio::test]
    async fn test_clear_provider_is_idempotent() {
        let (manager, config) = manager();
        config.add(api_key_provider("X", "sk")).unwrap();
        manager.get_provider("X").unwrap();

        manager.clear_provider("X");
        manager.clear_provider("X");
        assert_eq!(manager.entry_count(), 0);
    }
}
