//! Auth-method providers.
//!
//! One implementation per `method` tag, all behind the
//! [`AuthMethodProvider`] capability set. The [`MethodProvider`] enum wraps
//! every implementation, eliminating dynamic dispatch while keeping the
//! variant set closed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_domain::{
    AuthConfig, AuthCredential, AuthMethodKind, AuthStatusEvent, EventEmitter, OAuth2TokenData,
    SecretNamespace, SecretRef, StatusSnapshot, StatusViewItem,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{ConfigStore, HostInterface, OAuthHttp, SecretStore, UriCallbackBridge};

pub mod api_key;
pub mod oauth2;
pub mod vendor;
pub mod vendors;
pub mod vertex;

pub use api_key::ApiKeyProvider;
pub use oauth2::OAuth2Provider;
pub use vendor::VendorProvider;
pub use vertex::VertexProvider;

/// How long an authorization-code screen waits for the browser redirect
pub const AUTH_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Identity card of an auth method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDefinition {
    pub id: AuthMethodKind,
    pub label: &'static str,
    pub description: &'static str,
}

/// Result of a `configure` run
#[derive(Debug, Clone, Default)]
pub struct ConfigureOutcome {
    pub success: bool,
    pub config: Option<AuthConfig>,
    pub error: Option<String>,
}

impl ConfigureOutcome {
    pub fn ok(config: AuthConfig) -> Self {
        Self { success: true, config: Some(config), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, config: None, error: Some(error.into()) }
    }

    pub fn cancelled() -> Self {
        Self { success: false, config: None, error: None }
    }
}

/// Services every method provider needs
#[derive(Clone)]
pub struct MethodDeps {
    pub secrets: SecretStore,
    pub config: Arc<ConfigStore>,
    pub host: Arc<dyn HostInterface>,
    pub bridge: Arc<UriCallbackBridge>,
    pub http: OAuthHttp,
}

/// Common capability set of every auth method.
#[async_trait::async_trait]
pub trait AuthMethodProvider: Send + Sync {
    fn definition(&self) -> MethodDefinition;

    /// Lead time before `expires_at` at which a refresh should run
    fn expiry_buffer(&self) -> Duration;

    fn on_status(&self) -> &EventEmitter<AuthStatusEvent>;

    /// Returns a usable credential, refreshing first when the stored token
    /// is expired and refreshable. Fires `expired`/`error` and returns
    /// `None` when resolution fails.
    async fn get_credential(&self) -> Option<AuthCredential>;

    /// Expiry of the stored credential without triggering a refresh
    async fn current_expiry(&self) -> Option<i64>;

    async fn is_valid(&self) -> bool;

    async fn configure(&self, cancel: &CancellationToken) -> ConfigureOutcome;

    async fn revoke(&self);

    fn supports_refresh(&self) -> bool {
        false
    }

    /// Refreshes the stored credential. `false` means refresh was not
    /// possible or failed; the provider has already fired status.
    async fn refresh(&self) -> bool {
        false
    }

    /// UI projection: one-look state of this provider
    async fn status_snapshot(&self) -> StatusSnapshot;

    /// UI projection: detail rows for the provider view
    async fn status_view_items(&self) -> Vec<StatusViewItem> {
        let snapshot = self.status_snapshot().await;
        let mut items = vec![StatusViewItem {
            label: "Status".to_string(),
            detail: format!("{:?}", snapshot.status),
        }];
        if let Some(detail) = snapshot.detail {
            items.push(StatusViewItem { label: "Detail".to_string(), detail });
        }
        items
    }

    /// UI projection: one-line summary for provider lists
    async fn summary_detail(&self) -> String {
        self.definition().label.to_string()
    }
}

/// Enum wrapper over every method implementation
pub enum MethodProvider {
    ApiKey(ApiKeyProvider),
    OAuth2(OAuth2Provider),
    Vendor(VendorProvider),
    Vertex(VertexProvider),
}

impl MethodProvider {
    /// Instantiates the right implementation for an auth config.
    ///
    /// Returns `Ok(None)` for method `none`.
    ///
    /// # Errors
    ///
    /// Returns error when the config shape does not match any known method.
    pub fn try_new(
        provider_name: &str,
        auth: &AuthConfig,
        deps: MethodDeps,
    ) -> anyhow::Result<Option<Self>> {
        let provider = match auth {
            AuthConfig::None => return Ok(None),
            AuthConfig::ApiKey(_) => {
                Self::ApiKey(ApiKeyProvider::new(provider_name, auth.clone(), deps))
            }
            AuthConfig::Oauth2(_) => {
                Self::OAuth2(OAuth2Provider::new(provider_name, auth.clone(), deps))
            }
            AuthConfig::GoogleVertexAiAuth(_) => {
                Self::Vertex(VertexProvider::new(provider_name, auth.clone(), deps))
            }
            vendor => Self::Vendor(VendorProvider::new(
                provider_name,
                vendors::descriptor_for(vendor.method())
                    .ok_or_else(|| anyhow::anyhow!("no vendor descriptor for {}", vendor.method()))?,
                auth.clone(),
                deps,
            )),
        };
        Ok(Some(provider))
    }
}

#[async_trait::async_trait]
impl AuthMethodProvider for MethodProvider {
    fn definition(&self) -> MethodDefinition {
        match self {
            Self::ApiKey(provider) => provider.definition(),
            Self::OAuth2(provider) => provider.definition(),
            Self::Vendor(provider) => provider.definition(),
            Self::Vertex(provider) => provider.definition(),
        }
    }

    fn expiry_buffer(&self) -> Duration {
        match self {
            Self::ApiKey(provider) => provider.expiry_buffer(),
            Self::OAuth2(provider) => provider.expiry_buffer(),
            Self::Vendor(provider) => provider.expiry_buffer(),
            Self::Vertex(provider) => provider.expiry_buffer(),
        }
    }

    fn on_status(&self) -> &EventEmitter<AuthStatusEvent> {
        match self {
            Self::ApiKey(provider) => provider.on_status(),
            Self::OAuth2(provider) => provider.on_status(),
            Self::Vendor(provider) => provider.on_status(),
            Self::Vertex(provider) => provider.on_status(),
        }
    }

    async fn get_credential(&self) -> Option<AuthCredential> {
        match self {
            Self::ApiKey(provider) => provider.get_credential().await,
            Self::OAuth2(provider) => provider.get_credential().await,
            Self::Vendor(provider) => provider.get_credential().await,
            Self::Vertex(provider) => provider.get_credential().await,
        }
    }

    async fn current_expiry(&self) -> Option<i64> {
        match self {
            Self::ApiKey(provider) => provider.current_expiry().await,
            Self::OAuth2(provider) => provider.current_expiry().await,
            Self::Vendor(provider) => provider.current_expiry().await,
            Self::Vertex(provider) => provider.current_expiry().await,
        }
    }

    async fn is_valid(&self) -> bool {
        match self {
            Self::ApiKey(provider) => provider.is_valid().await,
            Self::OAuth2(provider) => provider.is_valid().await,
            Self::Vendor(provider) => provider.is_valid().await,
            Self::Vertex(provider) => provider.is_valid().await,
        }
    }

    async fn configure(&self, cancel: &CancellationToken) -> ConfigureOutcome {
        match self {
            Self::ApiKey(provider) => provider.configure(cancel).await,
            Self::OAuth2(provider) => provider.configure(cancel).await,
            Self::Vendor(provider) => provider.configure(cancel).await,
            Self::Vertex(provider) => provider.configure(cancel).await,
        }
    }

    async fn revoke(&self) {
        match self {
            Self::ApiKey(provider) => provider.revoke().await,
            Self::OAuth2(provider) => provider.revoke().await,
            Self::Vendor(provider) => provider.revoke().await,
            Self::Vertex(provider) => provider.revoke().await,
        }
    }

    fn supports_refresh(&self) -> bool {
        match self {
            Self::ApiKey(provider) => provider.supports_refresh(),
            Self::OAuth2(provider) => provider.supports_refresh(),
            Self::Vendor(provider) => provider.supports_refresh(),
            Self::Vertex(provider) => provider.supports_refresh(),
        }
    }

    async fn refresh(&self) -> bool {
        match self {
            Self::ApiKey(provider) => provider.refresh().await,
            Self::OAuth2(provider) => provider.refresh().await,
            Self::Vendor(provider) => provider.refresh().await,
            Self::Vertex(provider) => provider.refresh().await,
        }
    }

    async fn status_snapshot(&self) -> StatusSnapshot {
        match self {
            Self::ApiKey(provider) => provider.status_snapshot().await,
            Self::OAuth2(provider) => provider.status_snapshot().await,
            Self::Vendor(provider) => provider.status_snapshot().await,
            Self::Vertex(provider) => provider.status_snapshot().await,
        }
    }

    async fn summary_detail(&self) -> String {
        match self {
            Self::ApiKey(provider) => provider.summary_detail().await,
            Self::OAuth2(provider) => provider.summary_detail().await,
            Self::Vendor(provider) => provider.summary_detail().await,
            Self::Vertex(provider) => provider.summary_detail().await,
        }
    }
}

/// Shared mutable view of a provider's auth config plus its services.
///
/// Providers mutate the view and persist through the config store; the
/// store is the source of truth between sessions.
pub(crate) struct MethodState {
    pub provider_name: String,
    pub auth: Mutex<AuthConfig>,
    pub deps: MethodDeps,
    pub status: EventEmitter<AuthStatusEvent>,
}

impl MethodState {
    pub fn new(provider_name: &str, auth: AuthConfig, deps: MethodDeps) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            auth: Mutex::new(auth),
            deps,
            status: EventEmitter::new(),
        }
    }

    pub fn auth(&self) -> AuthConfig {
        self.auth.lock().unwrap().clone()
    }

    /// Writes the view back to the config store
    pub async fn persist(&self, auth: AuthConfig) {
        *self.auth.lock().unwrap() = auth.clone();
        if let Err(error) = self.deps.config.update_auth(&self.provider_name, auth).await {
            warn!(provider = %self.provider_name, %error, "persisting auth config failed");
        }
    }

    /// Loads the stored token record: inline JSON or secret reference
    pub async fn load_token(&self) -> Option<OAuth2TokenData> {
        let field = self.auth().token_field()?.to_string();
        match SecretRef::parse(&field) {
            Some(reference) => match self.deps.secrets.get_oauth2_token(&reference).await {
                Ok(record) => record,
                Err(error) => {
                    warn!(provider = %self.provider_name, %error, "reading token record failed");
                    None
                }
            },
            None => serde_json::from_str(&field).ok(),
        }
    }

    /// Persists a token record, reusing the existing reference when there
    /// is one. Token records always live in the secret store.
    pub async fn persist_token(&self, record: &OAuth2TokenData) -> anyhow::Result<()> {
        let mut auth = self.auth();
        let reference = auth
            .token_field()
            .and_then(SecretRef::parse)
            .filter(|reference| reference.namespace() == Some(SecretNamespace::OAuth2Token))
            .unwrap_or_else(|| self.deps.secrets.create_ref(SecretNamespace::OAuth2Token));
        self.deps.secrets.set_oauth2_token(&reference, record).await?;
        auth.set_token_field(Some(reference.to_string()));
        if auth.identity_id().is_none() {
            auth.set_identity_id(relay_domain::IdentityId::generate());
        }
        self.persist(auth).await;
        Ok(())
    }

    /// Deletes the stored token record and clears the field
    pub async fn clear_token(&self) {
        let mut auth = self.auth();
        if let Some(reference) = auth.token_field().and_then(SecretRef::parse)
            && let Err(error) = self.deps.secrets.delete_oauth2_token(&reference).await
        {
            warn!(provider = %self.provider_name, %error, "deleting token record failed");
        }
        auth.set_token_field(None);
        self.persist(auth).await;
    }

    pub fn emit(&self, event: AuthStatusEvent) {
        self.status.emit(&event);
    }
}

/// Builds a credential from a stored record when it is still usable
pub(crate) fn credential_if_fresh(
    record: &OAuth2TokenData,
    buffer: Duration,
) -> Option<AuthCredential> {
    if SecretStore::is_oauth2_token_expired(record, buffer.as_millis() as i64) {
        None
    } else {
        Some(AuthCredential::from_token(record))
    }
}

/// Fixed header set sent with a vendor's token requests
pub(crate) fn header_map(headers: &[(&str, &str)]) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
