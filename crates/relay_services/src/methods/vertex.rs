//! Vertex AI authentication: application default credentials, service
//! account keys, or a plain API key.
//!
//! Minted OAuth tokens are held in the provider instance only; the config
//! carries the long-lived material (key JSON or ADC on disk), never the
//! short-lived tokens.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use relay_domain::{
    AuthConfig, AuthCredential, AuthError, AuthMethodKind, AuthStatus, AuthStatusEvent,
    EventEmitter, OAuth2TokenData, SecretRef, StatusSnapshot, VertexAuth,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    AuthMethodProvider, ConfigureOutcome, MethodDefinition, MethodDeps, MethodState,
    credential_if_fresh,
};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Service account key file, the fields the JWT grant needs
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// Application default credentials written by `gcloud auth
/// application-default login`
#[derive(Debug, Clone, Deserialize)]
struct AdcFile {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    // Present when the ADC file itself is a service account key
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

pub struct VertexProvider {
    state: MethodState,
    /// Minted token, process-lifetime only
    cached: Mutex<Option<OAuth2TokenData>>,
}

impl VertexProvider {
    pub fn new(provider_name: &str, auth: AuthConfig, deps: MethodDeps) -> Self {
        Self { state: MethodState::new(provider_name, auth, deps), cached: Mutex::new(None) }
    }

    fn vertex(&self) -> Option<VertexAuth> {
        match self.state.auth() {
            AuthConfig::GoogleVertexAiAuth(vertex) => Some(vertex),
            _ => None,
        }
    }

    async fn resolve_api_key(&self, value: &str) -> Result<String, AuthError> {
        match SecretRef::parse(value) {
            None => Ok(value.to_string()),
            Some(reference) => self
                .state
                .deps
                .secrets
                .get_api_key(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?
                .ok_or_else(|| AuthError::MissingSecret(reference.to_string())),
        }
    }

    async fn resolve_service_account_key(&self, value: &str) -> Result<ServiceAccountKey, AuthError> {
        let json = match SecretRef::parse(value) {
            None => value.to_string(),
            Some(reference) => self
                .state
                .deps
                .secrets
                .get_oauth2_client_secret(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?
                .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?,
        };
        serde_json::from_str(&json)
            .map_err(|error| AuthError::Config(format!("invalid service account key: {error}")))
    }

    /// Signs a JWT with the key and exchanges it for an access token
    /// (RFC 7523 JWT-bearer grant).
    async fn mint_service_account_token(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<OAuth2TokenData, AuthError> {
        let audience = key.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URL);
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: key.client_email.clone(),
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            aud: audience.to_string(),
            iat: now,
            exp: now + 3600,
        };

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|error| AuthError::Config(format!("invalid private key: {error}")))?;
        let assertion = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|error| AuthError::Config(format!("signing assertion failed: {error}")))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let response = self
            .state
            .deps
            .http
            .post_token_form(audience, &params, &Default::default())
            .await?;
        Ok(response.into_token_data(None))
    }

    /// Exchanges the ADC refresh token for an access token
    async fn mint_adc_token(&self) -> Result<OAuth2TokenData, AuthError> {
        let path = std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
            .map(std::path::PathBuf::from)
            .ok()
            .or_else(|| {
                dirs::config_dir()
                    .map(|dir| dir.join("gcloud/application_default_credentials.json"))
            })
            .ok_or_else(|| {
                AuthError::Config("no application default credentials location".to_string())
            })?;

        let contents = std::fs::read_to_string(&path).map_err(|error| {
            AuthError::Config(format!(
                "reading application default credentials at {} failed: {error}",
                path.display()
            ))
        })?;
        let adc: AdcFile = serde_json::from_str(&contents)
            .map_err(|error| AuthError::Config(format!("invalid ADC file: {error}")))?;

        match adc.kind.as_str() {
            "authorized_user" => {
                let (Some(client_id), Some(client_secret), Some(refresh_token)) =
                    (&adc.client_id, &adc.client_secret, &adc.refresh_token)
                else {
                    return Err(AuthError::Config(
                        "ADC file is missing client or refresh token fields".to_string(),
                    ));
                };
                let params = [
                    ("grant_type", "refresh_token"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("refresh_token", refresh_token.as_str()),
                ];
                let response = self
                    .state
                    .deps
                    .http
                    .post_token_form(GOOGLE_TOKEN_URL, &params, &Default::default())
                    .await?;
                Ok(response.into_token_data(None))
            }
            "service_account" => {
                let (Some(client_email), Some(private_key)) = (&adc.client_email, &adc.private_key)
                else {
                    return Err(AuthError::Config(
                        "ADC service account file is missing key fields".to_string(),
                    ));
                };
                let key = ServiceAccountKey {
                    client_email: client_email.clone(),
                    private_key: private_key.clone(),
                    token_uri: adc.token_uri.clone(),
                };
                self.mint_service_account_token(&key).await
            }
            other => Err(AuthError::Config(format!("unsupported ADC type: {other}"))),
        }
    }

    async fn mint_token(&self) -> Result<OAuth2TokenData, AuthError> {
        match self.vertex() {
            Some(VertexAuth::Adc { .. }) => self.mint_adc_token().await,
            Some(VertexAuth::ServiceAccount { service_account_key, .. }) => {
                let key = self.resolve_service_account_key(&service_account_key).await?;
                self.mint_service_account_token(&key).await
            }
            Some(VertexAuth::ApiKey { .. }) | None => {
                Err(AuthError::Config("method does not mint tokens".to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl AuthMethodProvider for VertexProvider {
    fn definition(&self) -> MethodDefinition {
        MethodDefinition {
            id: AuthMethodKind::GoogleVertexAiAuth,
            label: "Vertex AI",
            description: "Authenticate to Google Vertex AI",
        }
    }

    fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn on_status(&self) -> &EventEmitter<AuthStatusEvent> {
        &self.state.status
    }

    async fn get_credential(&self) -> Option<AuthCredential> {
        match self.vertex()? {
            VertexAuth::ApiKey { api_key } => match self.resolve_api_key(&api_key).await {
                Ok(value) => Some(AuthCredential::key(value)),
                Err(error) => {
                    self.state
                        .emit(AuthStatusEvent::error(error.to_string(), error.error_type()));
                    None
                }
            },
            VertexAuth::Adc { .. } | VertexAuth::ServiceAccount { .. } => {
                let cached = self.cached.lock().unwrap().clone();
                if let Some(record) = cached
                    && let Some(credential) = credential_if_fresh(&record, self.expiry_buffer())
                {
                    return Some(credential);
                }

                match self.mint_token().await {
                    Ok(record) => {
                        let credential = AuthCredential::from_token(&record);
                        *self.cached.lock().unwrap() = Some(record);
                        self.state.emit(AuthStatusEvent::valid());
                        Some(credential)
                    }
                    Err(error) => {
                        self.state
                            .emit(AuthStatusEvent::error(error.to_string(), error.error_type()));
                        None
                    }
                }
            }
        }
    }

    async fn current_expiry(&self) -> Option<i64> {
        self.cached.lock().unwrap().as_ref()?.expires_at
    }

    async fn is_valid(&self) -> bool {
        match self.vertex() {
            Some(VertexAuth::ApiKey { api_key }) => !api_key.is_empty(),
            Some(VertexAuth::ServiceAccount { service_account_key, .. }) => {
                !service_account_key.is_empty()
            }
            Some(VertexAuth::Adc { .. }) => true,
            None => false,
        }
    }

    async fn configure(&self, _cancel: &CancellationToken) -> ConfigureOutcome {
        // Nothing interactive: validate by resolving a credential once
        match self.vertex() {
            Some(VertexAuth::ApiKey { api_key }) => match self.resolve_api_key(&api_key).await {
                Ok(_) => {
                    self.state.emit(AuthStatusEvent::valid());
                    ConfigureOutcome::ok(self.state.auth())
                }
                Err(error) => ConfigureOutcome::failed(error.to_string()),
            },
            Some(_) => match self.mint_token().await {
                Ok(record) => {
                    *self.cached.lock().unwrap() = Some(record);
                    self.state.emit(AuthStatusEvent::valid());
                    ConfigureOutcome::ok(self.state.auth())
                }
                Err(error) => ConfigureOutcome::failed(error.to_string()),
            },
            None => ConfigureOutcome::failed("auth config is not google-vertex-ai-auth"),
        }
    }

    async fn revoke(&self) {
        *self.cached.lock().unwrap() = None;
        self.state.emit(AuthStatusEvent::revoked());
    }

    fn supports_refresh(&self) -> bool {
        !matches!(self.vertex(), Some(VertexAuth::ApiKey { .. }) | None)
    }

    async fn refresh(&self) -> bool {
        match self.mint_token().await {
            Ok(record) => {
                *self.cached.lock().unwrap() = Some(record);
                self.state.emit(AuthStatusEvent::valid());
                true
            }
            Err(error) => {
                self.state
                    .emit(AuthStatusEvent::error(error.to_string(), error.error_type()));
                false
            }
        }
    }

    async fn status_snapshot(&self) -> StatusSnapshot {
        let detail = match self.vertex() {
            Some(VertexAuth::Adc { project_id, .. }) => {
                Some(format!("ADC{}", project_id.map(|p| format!(" ({p})")).unwrap_or_default()))
            }
            Some(VertexAuth::ServiceAccount { project_id, .. }) => Some(format!(
                "Service account{}",
                project_id.map(|p| format!(" ({p})")).unwrap_or_default()
            )),
            Some(VertexAuth::ApiKey { .. }) => Some("API key".to_string()),
            None => None,
        };
        let cached = self.cached.lock().unwrap().clone();
        StatusSnapshot {
            status: if self.is_valid().await { AuthStatus::Valid } else { AuthStatus::Revoked },
            detail,
            expires_at: cached.and_then(|record| record.expires_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use relay_domain::ProviderConfig;

    use super::*;
    use crate::{
        ConfigStore, InMemorySecretStorage, OAuthHttp, ScriptedHost, SecretStore,
        UriCallbackBridge,
    };

    fn deps() -> MethodDeps {
        let secrets = SecretStore::new(InMemorySecretStorage::new());
        MethodDeps {
            config: Arc::new(ConfigStore::new(secrets.clone())),
            secrets,
            host: ScriptedHost::new(),
            bridge: Arc::new(UriCallbackBridge::new("editor://relay.gateway/callback")),
            http: OAuthHttp::new(reqwest::Client::new()),
        }
    }

    #[tokio::test]
    async fn test_api_key_sub_method_resolves_inline() {
        let deps = deps();
        let auth =
            AuthConfig::GoogleVertexAiAuth(VertexAuth::ApiKey { api_key: "vk-1".to_string() });
        deps.config
            .add(ProviderConfig::new("V", "https://vertex.example", auth.clone()))
            .unwrap();
        let provider = VertexProvider::new("V", auth, deps);

        let credential = provider.get_credential().await.unwrap();
        assert_eq!(credential, AuthCredential::key("vk-1"));
        assert!(!provider.supports_refresh());
    }

    #[tokio::test]
    async fn test_invalid_service_account_key_is_config_error() {
        let deps = deps();
        let auth = AuthConfig::GoogleVertexAiAuth(VertexAuth::ServiceAccount {
            service_account_key: "not-json".to_string(),
            project_id: None,
            location: None,
        });
        deps.config
            .add(ProviderConfig::new("V", "https://vertex.example", auth.clone()))
            .unwrap();
        let provider = VertexProvider::new("V", auth, deps);

        let outcome = provider.configure(&CancellationToken::new()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("invalid service account key"));
    }
}
