use std::time::Duration;

use relay_domain::{
    AuthCredential, AuthErrorType, AuthMethodKind, AuthStatus, AuthStatusEvent, EventEmitter,
    SecretForm, SecretNamespace, SecretRef, StatusSnapshot,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{AuthMethodProvider, ConfigureOutcome, MethodDefinition, MethodDeps, MethodState};
use relay_domain::AuthConfig;

/// Static API key authentication.
///
/// The key lives either inline in settings or behind a secret reference,
/// depending on the ambient storage mode.
pub struct ApiKeyProvider {
    state: MethodState,
}

impl ApiKeyProvider {
    pub fn new(provider_name: &str, auth: AuthConfig, deps: MethodDeps) -> Self {
        Self { state: MethodState::new(provider_name, auth, deps) }
    }

    fn key_field(&self) -> Option<String> {
        match self.state.auth() {
            AuthConfig::ApiKey(api) => api.api_key,
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl AuthMethodProvider for ApiKeyProvider {
    fn definition(&self) -> MethodDefinition {
        MethodDefinition {
            id: AuthMethodKind::ApiKey,
            label: "API Key",
            description: "Authenticate with a static API key",
        }
    }

    fn expiry_buffer(&self) -> Duration {
        Duration::ZERO
    }

    fn on_status(&self) -> &EventEmitter<AuthStatusEvent> {
        &self.state.status
    }

    async fn get_credential(&self) -> Option<AuthCredential> {
        let field = self.key_field();
        match SecretForm::of(field.as_deref()) {
            SecretForm::Plain(value) => Some(AuthCredential::key(value)),
            SecretForm::Reference(reference) => {
                match self.state.deps.secrets.get_api_key(&reference).await {
                    Ok(Some(value)) => Some(AuthCredential::key(value)),
                    Ok(None) => {
                        self.state.emit(AuthStatusEvent::error(
                            format!("API key secret {reference} is missing from the store"),
                            AuthErrorType::AuthError,
                        ));
                        None
                    }
                    Err(error) => {
                        self.state.emit(AuthStatusEvent::error(
                            error.to_string(),
                            AuthErrorType::TransientError,
                        ));
                        None
                    }
                }
            }
            SecretForm::Absent => {
                self.state.emit(AuthStatusEvent::error(
                    "No API key configured",
                    AuthErrorType::AuthError,
                ));
                None
            }
        }
    }

    async fn current_expiry(&self) -> Option<i64> {
        None
    }

    async fn is_valid(&self) -> bool {
        self.key_field().is_some()
    }

    async fn configure(&self, _cancel: &CancellationToken) -> ConfigureOutcome {
        let answer = match self.state.deps.host.prompt_secret("Enter the API key").await {
            Ok(answer) => answer,
            Err(error) => return ConfigureOutcome::failed(error.to_string()),
        };
        let Some(value) = answer.map(|value| value.trim().to_string()).filter(|v| !v.is_empty())
        else {
            return ConfigureOutcome::cancelled();
        };

        let AuthConfig::ApiKey(mut api) = self.state.auth() else {
            return ConfigureOutcome::failed("auth config is not api-key");
        };

        if self.state.deps.config.store_secrets_in_settings() {
            api.api_key = Some(value);
        } else {
            let reference = api
                .api_key
                .as_deref()
                .and_then(SecretRef::parse)
                .unwrap_or_else(|| self.state.deps.secrets.create_ref(SecretNamespace::ApiKey));
            if let Err(error) = self.state.deps.secrets.set_api_key(&reference, &value).await {
                return ConfigureOutcome::failed(error.to_string());
            }
            api.api_key = Some(reference.to_string());
        }

        let auth = AuthConfig::ApiKey(api);
        self.state.persist(auth.clone()).await;
        self.state.emit(AuthStatusEvent::valid());
        ConfigureOutcome::ok(auth)
    }

    async fn revoke(&self) {
        let AuthConfig::ApiKey(mut api) = self.state.auth() else { return };
        if let Some(reference) = api.api_key.as_deref().and_then(SecretRef::parse)
            && let Err(error) = self.state.deps.secrets.delete_api_key(&reference).await
        {
            warn!(provider = %self.state.provider_name, %error, "deleting API key secret failed");
        }
        api.api_key = None;
        self.state.persist(AuthConfig::ApiKey(api)).await;
        self.state.emit(AuthStatusEvent::revoked());
    }

    async fn status_snapshot(&self) -> StatusSnapshot {
        let status = match self.key_field() {
            Some(_) => AuthStatus::Valid,
            None => AuthStatus::Revoked,
        };
        StatusSnapshot { status, detail: None, expires_at: None }
    }

    async fn summary_detail(&self) -> String {
        match self.state.auth() {
            AuthConfig::ApiKey(api) => match self
                .state
                .deps
                .secrets
                .get_api_key_status(api.api_key.as_deref())
                .await
            {
                crate::ApiKeyStatus::Unset => "API key not configured".to_string(),
                crate::ApiKeyStatus::Plain => "API key (in settings)".to_string(),
                crate::ApiKeyStatus::Secret => "API key (in secret storage)".to_string(),
                crate::ApiKeyStatus::MissingSecret => "API key secret missing".to_string(),
            },
            _ => "API key".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use relay_domain::ApiKeyAuth;

    use super::*;
    use crate::{ConfigStore, InMemorySecretStorage, OAuthHttp, ScriptedHost, SecretStore,
        UriCallbackBridge};

    fn deps() -> (MethodDeps, Arc<ScriptedHost>) {
        let secrets = SecretStore::new(InMemorySecretStorage::new());
        let config = Arc::new(ConfigStore::new(secrets.clone()));
        let host = ScriptedHost::new();
        let deps = MethodDeps {
            secrets,
            config,
            host: host.clone(),
            bridge: Arc::new(UriCallbackBridge::new("editor://relay.gateway/callback")),
            http: OAuthHttp::new(reqwest::Client::new()),
        };
        (deps, host)
    }

    fn provider_with_config(deps: &MethodDeps, auth: AuthConfig) -> ApiKeyProvider {
        deps.config
            .add(relay_domain::ProviderConfig::new(
                "X",
                "https://api.example",
                auth.clone(),
            ))
            .unwrap();
        ApiKeyProvider::new("X", auth, deps.clone())
    }

    #[tokio::test]
    async fn test_inline_key_resolves() {
        let (deps, _) = deps();
        let provider = provider_with_config(
            &deps,
            AuthConfig::ApiKey(ApiKeyAuth { label: None, api_key: Some("sk-test".to_string()) }),
        );

        let credential = provider.get_credential().await.unwrap();
        assert_eq!(credential, AuthCredential::key("sk-test"));
    }

    #[tokio::test]
    async fn test_configure_stores_secret_and_fires_valid() {
        let (deps, host) = deps();
        host.push_prompt_answer(Some("  sk-new  "));
        let provider = provider_with_config(&deps, AuthConfig::ApiKey(ApiKeyAuth::default()));

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let _subscription = provider.on_status().subscribe(move |event: &AuthStatusEvent| {
            events_clone.lock().unwrap().push(event.clone());
        });

        let outcome = provider.configure(&CancellationToken::new()).await;
        assert!(outcome.success);

        // Trimmed and stored behind a reference (mode defaults to store)
        let credential = provider.get_credential().await.unwrap();
        assert_eq!(credential.value, "sk-new");
        let AuthConfig::ApiKey(api) = deps.config.find("X").unwrap().auth else { panic!() };
        assert!(SecretRef::is_reference(api.api_key.as_deref().unwrap()));

        assert_eq!(events.lock().unwrap().as_slice(), &[AuthStatusEvent::valid()]);
    }

    #[tokio::test]
    async fn test_revoke_deletes_secret_and_clears_field() {
        let (deps, host) = deps();
        host.push_prompt_answer(Some("sk-gone"));
        let provider = provider_with_config(&deps, AuthConfig::ApiKey(ApiKeyAuth::default()));
        provider.configure(&CancellationToken::new()).await;

        provider.revoke().await;

        assert_eq!(provider.get_credential().await, None);
        let AuthConfig::ApiKey(api) = deps.config.find("X").unwrap().auth else { panic!() };
        assert_eq!(api.api_key, None);
    }

    #[tokio::test]
    async fn test_missing_secret_fires_error() {
        let (deps, _) = deps();
        let dangling = deps.secrets.create_ref(SecretNamespace::ApiKey);
        let provider = provider_with_config(
            &deps,
            AuthConfig::ApiKey(ApiKeyAuth {
                label: None,
                api_key: Some(dangling.to_string()),
            }),
        );

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let _subscription = provider.on_status().subscribe(move |event: &AuthStatusEvent| {
            events_clone.lock().unwrap().push(event.clone());
        });

        assert_eq!(provider.get_credential().await, None);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, AuthStatus::Error);
        assert_eq!(events[0].error_type, Some(AuthErrorType::AuthError));
    }
}
