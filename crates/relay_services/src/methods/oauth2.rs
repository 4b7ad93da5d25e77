use std::collections::HashMap;
use std::time::Duration;

use relay_domain::{
    AuthConfig, AuthCredential, AuthError, AuthErrorType, AuthMethodKind, AuthStatus,
    AuthStatusEvent, EventEmitter, OAuth2Config, SecretRef, StatusSnapshot,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    AUTH_CALLBACK_TIMEOUT, AuthMethodProvider, ConfigureOutcome, MethodDefinition, MethodDeps,
    MethodState, credential_if_fresh,
};
use crate::pkce::{generate_code_challenge, generate_code_verifier, generate_state};

/// Generic OAuth2 over user-supplied endpoints.
///
/// Dispatches on the configured grant type: authorization code (PKCE by
/// default, redirect through the URI-callback bridge), client credentials,
/// or RFC 8628 device code.
pub struct OAuth2Provider {
    state: MethodState,
}

impl OAuth2Provider {
    pub fn new(provider_name: &str, auth: AuthConfig, deps: MethodDeps) -> Self {
        Self { state: MethodState::new(provider_name, auth, deps) }
    }

    fn oauth(&self) -> Option<OAuth2Config> {
        match self.state.auth() {
            AuthConfig::Oauth2(auth) => Some(auth.oauth),
            _ => None,
        }
    }

    /// Client secret with any reference resolved through the store
    async fn resolve_client_secret(&self, oauth: &OAuth2Config) -> Result<Option<String>, AuthError> {
        let Some(value) = oauth.client_secret() else { return Ok(None) };
        match SecretRef::parse(value) {
            None => Ok(Some(value.to_string())),
            Some(reference) => self
                .state
                .deps
                .secrets
                .get_oauth2_client_secret(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?
                .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))
                .map(Some),
        }
    }

    async fn configure_authorization_code(
        &self,
        oauth: &OAuth2Config,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let OAuth2Config::AuthorizationCode {
            authorization_url,
            client_id,
            pkce,
            redirect_uri,
            endpoints,
            ..
        } = oauth
        else {
            return Err(AuthError::Config("not an authorization_code grant".to_string()));
        };

        let state = generate_state();
        let verifier = pkce.then(generate_code_verifier);
        let redirect = redirect_uri
            .clone()
            .unwrap_or_else(|| self.state.deps.bridge.redirect_uri());

        let mut url = url::Url::parse(authorization_url)
            .map_err(|error| AuthError::InitiationFailed(format!("invalid auth URL: {error}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", client_id);
            query.append_pair("redirect_uri", &redirect);
            query.append_pair("response_type", "code");
            let scope = endpoints.scope_string();
            if !scope.is_empty() {
                query.append_pair("scope", &scope);
            }
            query.append_pair("state", &state);
            if let Some(verifier) = &verifier {
                let challenge = generate_code_challenge(verifier)
                    .map_err(|error| AuthError::InitiationFailed(error.to_string()))?;
                query.append_pair("code_challenge", &challenge);
                query.append_pair("code_challenge_method", "S256");
            }
        }

        self.state
            .deps
            .host
            .open_external(url.as_str())
            .await
            .map_err(|error| AuthError::InitiationFailed(error.to_string()))?;

        let code = self
            .state
            .deps
            .bridge
            .wait_for_callback(&state, cancel, AUTH_CALLBACK_TIMEOUT)
            .await?;

        let client_secret = self.resolve_client_secret(oauth).await?;
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", client_id.as_str()),
            ("redirect_uri", redirect.as_str()),
        ];
        if let Some(secret) = client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        if let Some(verifier) = verifier.as_deref() {
            params.push(("code_verifier", verifier));
        }

        let response = self
            .state
            .deps
            .http
            .post_token_form(&endpoints.token_url, &params, &HashMap::new())
            .await?;

        let record = response.into_token_data(None);
        self.state
            .persist_token(&record)
            .await
            .map_err(|error| AuthError::CompletionFailed(error.to_string()))?;
        Ok(())
    }

    async fn configure_client_credentials(&self, oauth: &OAuth2Config) -> Result<(), AuthError> {
        let OAuth2Config::ClientCredentials { client_id, endpoints, .. } = oauth else {
            return Err(AuthError::Config("not a client_credentials grant".to_string()));
        };
        let secret = self
            .resolve_client_secret(oauth)
            .await?
            .ok_or_else(|| AuthError::Config("client secret is required".to_string()))?;

        let scope = endpoints.scope_string();
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", secret.as_str()),
        ];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        let response = self
            .state
            .deps
            .http
            .post_token_form(&endpoints.token_url, &params, &HashMap::new())
            .await?;
        let record = response.into_token_data(None);
        self.state
            .persist_token(&record)
            .await
            .map_err(|error| AuthError::CompletionFailed(error.to_string()))?;
        Ok(())
    }

    async fn configure_device_code(
        &self,
        oauth: &OAuth2Config,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let OAuth2Config::DeviceCode { device_authorization_url, client_id, endpoints } = oauth
        else {
            return Err(AuthError::Config("not a device_code grant".to_string()));
        };

        let device = self
            .state
            .deps
            .http
            .device_authorization(
                device_authorization_url,
                client_id,
                &endpoints.scope_string(),
                &HashMap::new(),
            )
            .await?;

        self.state
            .deps
            .host
            .show_device_prompt(&crate::DevicePrompt {
                user_code: device.user_code.clone(),
                verification_uri: device.verification_uri.clone(),
                verification_uri_complete: device.verification_uri_complete.clone(),
            })
            .await
            .map_err(|error| AuthError::InitiationFailed(error.to_string()))?;

        let response = self
            .state
            .deps
            .http
            .poll_device_token(
                &endpoints.token_url,
                client_id,
                &device.device_code,
                device.interval,
                device.expires_in,
                &HashMap::new(),
                cancel,
            )
            .await?;

        let record = response.into_token_data(None);
        self.state
            .persist_token(&record)
            .await
            .map_err(|error| AuthError::CompletionFailed(error.to_string()))?;
        Ok(())
    }

    /// Runs the refresh appropriate to the grant, persisting the new record
    async fn refresh_inner(&self) -> Result<bool, AuthError> {
        let Some(oauth) = self.oauth() else {
            return Err(AuthError::Config("auth config is not oauth2".to_string()));
        };

        match &oauth {
            OAuth2Config::AuthorizationCode { client_id, endpoints, .. } => {
                let Some(record) = self.state.load_token().await else {
                    return Ok(false);
                };
                let Some(refresh_token) = record.refresh_token.clone() else {
                    // Non-refreshable token
                    return Ok(false);
                };

                let client_secret = self.resolve_client_secret(&oauth).await?;
                let mut params = vec![
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("client_id", client_id.as_str()),
                ];
                if let Some(secret) = client_secret.as_deref() {
                    params.push(("client_secret", secret));
                }

                let response = self
                    .state
                    .deps
                    .http
                    .post_token_form(&endpoints.token_url, &params, &HashMap::new())
                    .await?;
                let updated = response.into_token_data(Some(&refresh_token));
                self.state
                    .persist_token(&updated)
                    .await
                    .map_err(|error| AuthError::RefreshFailed(error.to_string()))?;
                Ok(true)
            }
            OAuth2Config::ClientCredentials { .. } => {
                self.configure_client_credentials(&oauth).await?;
                Ok(true)
            }
            OAuth2Config::DeviceCode { .. } => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl AuthMethodProvider for OAuth2Provider {
    fn definition(&self) -> MethodDefinition {
        MethodDefinition {
            id: AuthMethodKind::Oauth2,
            label: "OAuth 2.0",
            description: "Authenticate against a custom OAuth 2.0 provider",
        }
    }

    fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn on_status(&self) -> &EventEmitter<AuthStatusEvent> {
        &self.state.status
    }

    async fn get_credential(&self) -> Option<AuthCredential> {
        let Some(record) = self.state.load_token().await else {
            self.state.emit(AuthStatusEvent::expired(
                "Not authorized",
                AuthErrorType::AuthError,
            ));
            return None;
        };

        if let Some(credential) = credential_if_fresh(&record, self.expiry_buffer()) {
            return Some(credential);
        }

        // Expired: refresh when the grant allows it
        match self.refresh_inner().await {
            Ok(true) => {
                self.state.emit(AuthStatusEvent::valid());
                self.state
                    .load_token()
                    .await
                    .map(|record| AuthCredential::from_token(&record))
            }
            Ok(false) => {
                self.state.emit(AuthStatusEvent::expired(
                    "Token expired and cannot be refreshed",
                    AuthErrorType::AuthError,
                ));
                None
            }
            Err(error) => {
                self.state
                    .emit(AuthStatusEvent::error(error.to_string(), error.error_type()));
                None
            }
        }
    }

    async fn current_expiry(&self) -> Option<i64> {
        self.state.load_token().await?.expires_at
    }

    async fn is_valid(&self) -> bool {
        self.state.load_token().await.is_some()
    }

    async fn configure(&self, cancel: &CancellationToken) -> ConfigureOutcome {
        let Some(oauth) = self.oauth() else {
            return ConfigureOutcome::failed("auth config is not oauth2");
        };

        let result = match &oauth {
            OAuth2Config::AuthorizationCode { .. } => {
                self.configure_authorization_code(&oauth, cancel).await
            }
            OAuth2Config::ClientCredentials { .. } => {
                self.configure_client_credentials(&oauth).await
            }
            OAuth2Config::DeviceCode { .. } => self.configure_device_code(&oauth, cancel).await,
        };

        match result {
            Ok(()) => {
                self.state.emit(AuthStatusEvent::valid());
                ConfigureOutcome::ok(self.state.auth())
            }
            Err(AuthError::Cancelled) => ConfigureOutcome::cancelled(),
            Err(error) => ConfigureOutcome::failed(error.to_string()),
        }
    }

    async fn revoke(&self) {
        // Best-effort revocation of both tokens before clearing state
        if let Some(oauth) = self.oauth()
            && let Some(revocation_url) = oauth.endpoints().revocation_url.clone()
            && let Some(record) = self.state.load_token().await
        {
            let client_id = oauth.client_id();
            self.state
                .deps
                .http
                .revoke_token(&revocation_url, &record.access_token, client_id)
                .await;
            if let Some(refresh_token) = &record.refresh_token {
                self.state
                    .deps
                    .http
                    .revoke_token(&revocation_url, refresh_token, client_id)
                    .await;
            }
            debug!(provider = %self.state.provider_name, "revocation requests sent");
        }

        self.state.clear_token().await;
        self.state.emit(AuthStatusEvent::revoked());
    }

    fn supports_refresh(&self) -> bool {
        self.oauth()
            .map(|oauth| oauth.supports_refresh())
            .unwrap_or(false)
    }

    async fn refresh(&self) -> bool {
        match self.refresh_inner().await {
            Ok(true) => {
                self.state.emit(AuthStatusEvent::valid());
                true
            }
            Ok(false) => {
                self.state.emit(AuthStatusEvent::expired(
                    "Token cannot be refreshed",
                    AuthErrorType::AuthError,
                ));
                false
            }
            Err(error) => {
                self.state
                    .emit(AuthStatusEvent::error(error.to_string(), error.error_type()));
                false
            }
        }
    }

    async fn status_snapshot(&self) -> StatusSnapshot {
        match self.state.load_token().await {
            Some(record) => {
                let expired =
                    crate::SecretStore::is_oauth2_token_expired(&record, 0);
                StatusSnapshot {
                    status: if expired { AuthStatus::Expired } else { AuthStatus::Valid },
                    detail: record.scope.clone(),
                    expires_at: record.expires_at,
                }
            }
            None => StatusSnapshot { status: AuthStatus::Revoked, detail: None, expires_at: None },
        }
    }

    async fn summary_detail(&self) -> String {
        match self.oauth() {
            Some(OAuth2Config::AuthorizationCode { .. }) => "OAuth 2.0 (authorization code)",
            Some(OAuth2Config::ClientCredentials { .. }) => "OAuth 2.0 (client credentials)",
            Some(OAuth2Config::DeviceCode { .. }) => "OAuth 2.0 (device code)",
            None => "OAuth 2.0",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockito::Server;
    use pretty_assertions::assert_eq;
    use relay_domain::{OAuth2Auth, OAuth2Endpoints, ProviderConfig};

    use super::*;
    use crate::{
        ConfigStore, InMemorySecretStorage, OAuthHttp, ScriptedHost, SecretStore,
        UriCallbackBridge,
    };

    fn deps() -> (MethodDeps, Arc<ScriptedHost>, Arc<UriCallbackBridge>) {
        let secrets = SecretStore::new(InMemorySecretStorage::new());
        let config = Arc::new(ConfigStore::new(secrets.clone()));
        let host = ScriptedHost::new();
        let bridge = Arc::new(UriCallbackBridge::new("editor://relay.gateway/callback"));
        let deps = MethodDeps {
            secrets,
            config,
            host: host.clone(),
            bridge: bridge.clone(),
            http: OAuthHttp::new(reqwest::Client::new()),
        };
        (deps, host, bridge)
    }

    fn auth_code_config(server: &Server) -> AuthConfig {
        AuthConfig::Oauth2(OAuth2Auth {
            identity_id: None,
            token: None,
            oauth: OAuth2Config::AuthorizationCode {
                authorization_url: "https://auth.example/authorize".to_string(),
                client_id: "c".to_string(),
                client_secret: None,
                pkce: true,
                redirect_uri: None,
                endpoints: OAuth2Endpoints::new(format!("{}/token", server.url())),
            },
        })
    }

    fn provider(deps: &MethodDeps, auth: AuthConfig) -> OAuth2Provider {
        deps.config
            .add(ProviderConfig::new("X", "https://api.example", auth.clone()))
            .unwrap();
        OAuth2Provider::new("X", auth, deps.clone())
    }

    /// Extracts the state query parameter from the opened browser URL
    fn state_from_url(url: &str) -> String {
        let parsed = url::Url::parse(url).unwrap();
        parsed
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_authorization_code_flow_with_pkce() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "abc".into()),
                mockito::Matcher::Regex("code_verifier=".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"access_token":"t1","refresh_token":"r1","token_type":"Bearer","expires_in":3600}"#,
            )
            .create_async()
            .await;

        let (deps, host, bridge) = deps();
        let provider = Arc::new(provider(&deps, auth_code_config(&server)));

        let configure = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.configure(&CancellationToken::new()).await })
        };

        // Wait until the browser open was recorded, then deliver the
        // redirect with the matching state
        let url = loop {
            if let Some(url) = host.last_opened_url() {
                break url;
            }
            tokio::task::yield_now().await;
        };
        assert!(url.contains("code_challenge_method=S256"));
        let state = state_from_url(&url);
        bridge.handle_uri(&format!(
            "editor://relay.gateway/callback?state={state}&code=abc"
        ));

        let outcome = configure.await.unwrap();
        assert!(outcome.success, "{:?}", outcome.error);

        let credential = provider.get_credential().await.unwrap();
        assert_eq!(credential.value, "t1");
        assert_eq!(credential.token_type.as_deref(), Some("Bearer"));
        assert!(credential.expires_at.is_some());
        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_preserves_prior_refresh_token() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"t2","token_type":"Bearer","expires_in":3600}"#)
            .create_async()
            .await;

        let (deps, _, _) = deps();
        let provider = provider(&deps, auth_code_config(&server));
        let record = relay_domain::OAuth2TokenData::bearer("t1".to_string(), Some(0)).refresh_token("r1".to_string());
        provider.state.persist_token(&record).await.unwrap();

        assert!(provider.refresh().await);

        let updated = provider.state.load_token().await.unwrap();
        assert_eq!(updated.access_token.to_string(), "t2");
        // Server omitted the refresh token; the prior one survives
        assert_eq!(
            updated.refresh_token,
            Some(relay_domain::RefreshToken::from("r1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_fires_auth_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let (deps, _, _) = deps();
        let provider = provider(&deps, auth_code_config(&server));
        let record = relay_domain::OAuth2TokenData::bearer("t1".to_string(), Some(0)).refresh_token("r1".to_string());
        provider.state.persist_token(&record).await.unwrap();

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let _subscription = provider.on_status().subscribe(move |event: &AuthStatusEvent| {
            events_clone.lock().unwrap().push(event.clone());
        });

        assert!(!provider.refresh().await);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, AuthStatus::Error);
        assert_eq!(events[0].error_type, Some(AuthErrorType::AuthError));
    }

    #[tokio::test]
    async fn test_non_refreshable_token_expires() {
        let (deps, _, _) = deps();
        let server = Server::new_async().await;
        let provider = provider(&deps, auth_code_config(&server));
        // Expired, no refresh token
        let record = relay_domain::OAuth2TokenData::bearer("t1".to_string(), Some(0));
        provider.state.persist_token(&record).await.unwrap();

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let _subscription = provider.on_status().subscribe(move |event: &AuthStatusEvent| {
            events_clone.lock().unwrap().push(event.clone());
        });

        assert_eq!(provider.get_credential().await, None);
        assert_eq!(events.lock().unwrap()[0].status, AuthStatus::Expired);
    }

    #[tokio::test]
    async fn test_client_credentials_refresh_reruns_grant() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                mockito::Matcher::UrlEncoded("client_secret".into(), "cs".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"t1","token_type":"Bearer","expires_in":60}"#)
            .expect(2)
            .create_async()
            .await;

        let (deps, _, _) = deps();
        let auth = AuthConfig::Oauth2(OAuth2Auth {
            identity_id: None,
            token: None,
            oauth: OAuth2Config::ClientCredentials {
                client_id: "c".to_string(),
                client_secret: "cs".to_string(),
                endpoints: OAuth2Endpoints::new(format!("{}/token", server.url())),
            },
        });
        let provider = provider(&deps, auth);

        assert!(provider.configure(&CancellationToken::new()).await.success);
        assert!(provider.refresh().await);
        mock.assert_async().await;
    }
}
