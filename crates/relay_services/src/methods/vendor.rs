use std::time::Duration;

use relay_domain::{
    AuthConfig, AuthCredential, AuthError, AuthErrorType, AuthMethodKind, AuthStatus,
    AuthStatusEvent, EventEmitter, OAuth2TokenData, StatusSnapshot, StatusViewItem,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::vendors;
use super::{
    AUTH_CALLBACK_TIMEOUT, AuthMethodProvider, ConfigureOutcome, MethodDefinition, MethodDeps,
    MethodState, credential_if_fresh, header_map,
};
use crate::TokenResponse;
use crate::pkce::{generate_code_challenge, generate_code_verifier, generate_state};

/// Which user-facing flow a vendor runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorFlow {
    /// Browser authorization with redirect through the URI bridge
    AuthorizationCode,
    /// RFC 8628 device-code prompt
    DeviceCode,
}

/// Static description of one vendor OAuth integration.
///
/// Every vendor hardcodes its client id, endpoints, scopes and header set;
/// the shared [`VendorProvider`] drives the flow and calls back into the
/// vendor module for anything vendor-specific (onboarding, API-key
/// exchange, account metadata).
pub struct VendorDescriptor {
    pub kind: AuthMethodKind,
    pub label: &'static str,
    pub description: &'static str,
    pub client_id: &'static str,
    pub client_secret: Option<&'static str>,
    /// Authorization URL (code flow) or device-authorization URL
    pub authorization_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
    /// Vendor-fixed redirect; `None` means the bridge computes one
    pub redirect_uri: Option<&'static str>,
    pub flow: VendorFlow,
    pub pkce: bool,
    pub expiry_buffer_secs: u64,
    /// Endpoint answering `{ email }` for the signed-in account
    pub user_info_url: Option<&'static str>,
    /// Fixed headers sent with this vendor's token requests
    pub headers: &'static [(&'static str, &'static str)],
}

impl VendorDescriptor {
    fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Shared implementation of the vendor OAuth family.
pub struct VendorProvider {
    state: MethodState,
    descriptor: &'static VendorDescriptor,
}

impl VendorProvider {
    pub fn new(
        provider_name: &str,
        descriptor: &'static VendorDescriptor,
        auth: AuthConfig,
        deps: MethodDeps,
    ) -> Self {
        Self { state: MethodState::new(provider_name, auth, deps), descriptor }
    }

    async fn run_authorization_code(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TokenResponse, AuthError> {
        let descriptor = self.descriptor;
        let state = generate_state();
        let verifier = descriptor.pkce.then(generate_code_verifier);
        let redirect = descriptor
            .redirect_uri
            .map(str::to_string)
            .unwrap_or_else(|| self.state.deps.bridge.redirect_uri());

        let mut url = url::Url::parse(descriptor.authorization_url)
            .map_err(|error| AuthError::InitiationFailed(format!("invalid auth URL: {error}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", descriptor.client_id);
            query.append_pair("redirect_uri", &redirect);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &descriptor.scope_string());
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

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", descriptor.client_id),
            ("redirect_uri", redirect.as_str()),
        ];
        if let Some(secret) = descriptor.client_secret {
            params.push(("client_secret", secret));
        }
        if let Some(verifier) = verifier.as_deref() {
            params.push(("code_verifier", verifier));
        }

        self.state
            .deps
            .http
            .post_token_form(descriptor.token_url, &params, &header_map(descriptor.headers))
            .await
    }

    async fn run_device_code(&self, cancel: &CancellationToken) -> Result<TokenResponse, AuthError> {
        let descriptor = self.descriptor;
        let headers = header_map(descriptor.headers);

        let device = self
            .state
            .deps
            .http
            .device_authorization(
                descriptor.authorization_url,
                descriptor.client_id,
                &descriptor.scope_string(),
                &headers,
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

        self.state
            .deps
            .http
            .poll_device_token(
                descriptor.token_url,
                descriptor.client_id,
                &device.device_code,
                device.interval,
                device.expires_in,
                &headers,
                cancel,
            )
            .await
    }

    /// Vendor-specific post-authorization work: onboarding, API-key
    /// exchange, derived-field queries. Mutates the record and the auth
    /// config in place.
    async fn after_authorize(
        &self,
        record: &mut OAuth2TokenData,
        response: &TokenResponse,
        auth: &mut AuthConfig,
    ) -> Result<(), AuthError> {
        let http = &self.state.deps.http;
        match self.descriptor.kind {
            AuthMethodKind::AntigravityOauth => {
                let onboarding =
                    vendors::antigravity::onboard(http.client(), &record.access_token).await?;
                if let AuthConfig::AntigravityOauth(antigravity) = auth {
                    antigravity.project_id = onboarding.project_id;
                    antigravity.tier = onboarding.tier;
                }
            }
            AuthMethodKind::GoogleGeminiOauth => {
                let loaded = vendors::gemini_cli::load_code_assist(
                    http.client(),
                    &record.access_token,
                    match auth {
                        AuthConfig::GoogleGeminiOauth(gemini) => gemini.project_id.as_deref(),
                        _ => None,
                    },
                )
                .await?;
                if let AuthConfig::GoogleGeminiOauth(gemini) = auth {
                    gemini.managed_project_id = loaded.managed_project_id;
                }
            }
            AuthMethodKind::GithubCopilot => {
                let enterprise_url = match auth {
                    AuthConfig::GithubCopilot(copilot) => copilot.enterprise_url.clone(),
                    _ => None,
                };
                // The GitHub OAuth token is only good for minting Copilot
                // API keys; keep it in the refresh slot and serve the key.
                let github_token = record.access_token.to_string();
                let key = vendors::github_copilot::exchange_api_key(
                    http.client(),
                    &github_token,
                    enterprise_url.as_deref(),
                )
                .await?;
                record.access_token = key.api_key.into();
                record.expires_at = Some(key.expires_at_ms);
                record.refresh_token = Some(github_token.into());
            }
            AuthMethodKind::QwenCode => {
                if let AuthConfig::QwenCode(qwen) = auth
                    && let Some(resource_url) = response.extra_str("resource_url")
                {
                    qwen.resource_url = Some(resource_url.to_string());
                }
            }
            AuthMethodKind::OpenaiCodex => {
                if let AuthConfig::OpenaiCodex(codex) = auth
                    && let Some(account_id) = response.extra_str("account_id")
                {
                    codex.account_id = Some(account_id.to_string());
                }
            }
            _ => {}
        }

        self.fill_account_email(record, auth).await;
        Ok(())
    }

    /// Queries the vendor's user-info endpoint when the email is missing
    async fn fill_account_email(&self, record: &OAuth2TokenData, auth: &mut AuthConfig) {
        let Some(user_info_url) = self.descriptor.user_info_url else { return };
        let already_known = auth
            .vendor_base()
            .map(|base| base.email.is_some())
            .unwrap_or(true);
        if already_known {
            return;
        }

        match vendors::fetch_user_email(
            self.state.deps.http.client(),
            user_info_url,
            &record.access_token,
        )
        .await
        {
            Ok(Some(email)) => {
                if let Some(base) = auth.vendor_base_mut() {
                    base.email = Some(email);
                }
            }
            Ok(None) => {}
            Err(error) => {
                debug!(provider = %self.state.provider_name, %error, "user-info query failed");
            }
        }
    }

    async fn refresh_inner(&self) -> Result<bool, AuthError> {
        let Some(record) = self.state.load_token().await else {
            return Ok(false);
        };
        let Some(refresh_token) = record.refresh_token.clone() else {
            return Ok(false);
        };
        let descriptor = self.descriptor;

        let updated = if descriptor.kind == AuthMethodKind::GithubCopilot {
            // The refresh slot holds the GitHub OAuth token; re-exchange it
            // for a fresh Copilot API key.
            let enterprise_url = match self.state.auth() {
                AuthConfig::GithubCopilot(copilot) => copilot.enterprise_url,
                _ => None,
            };
            let key = vendors::github_copilot::exchange_api_key(
                self.state.deps.http.client(),
                &refresh_token,
                enterprise_url.as_deref(),
            )
            .await?;
            let mut updated = record.clone();
            updated.access_token = key.api_key.into();
            updated.expires_at = Some(key.expires_at_ms);
            updated
        } else {
            let mut params = vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", descriptor.client_id),
            ];
            if let Some(secret) = descriptor.client_secret {
                params.push(("client_secret", secret));
            }
            let response = self
                .state
                .deps
                .http
                .post_token_form(descriptor.token_url, &params, &header_map(descriptor.headers))
                .await?;
            response.into_token_data(Some(&refresh_token))
        };

        // Re-query account metadata that is still missing
        let mut auth = self.state.auth();
        if descriptor.kind == AuthMethodKind::AntigravityOauth
            && matches!(&auth, AuthConfig::AntigravityOauth(a) if a.project_id.is_none())
        {
            match vendors::antigravity::onboard(self.state.deps.http.client(), &updated.access_token)
                .await
            {
                Ok(onboarding) => {
                    if let AuthConfig::AntigravityOauth(antigravity) = &mut auth {
                        antigravity.project_id = onboarding.project_id;
                        antigravity.tier = onboarding.tier;
                    }
                }
                Err(error) => {
                    warn!(provider = %self.state.provider_name, %error, "onboarding retry failed")
                }
            }
        }
        self.fill_account_email(&updated, &mut auth).await;
        self.state.persist(auth).await;

        self.state
            .persist_token(&updated)
            .await
            .map_err(|error| AuthError::RefreshFailed(error.to_string()))?;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl AuthMethodProvider for VendorProvider {
    fn definition(&self) -> MethodDefinition {
        MethodDefinition {
            id: self.descriptor.kind,
            label: self.descriptor.label,
            description: self.descriptor.description,
        }
    }

    fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(self.descriptor.expiry_buffer_secs)
    }

    fn on_status(&self) -> &EventEmitter<AuthStatusEvent> {
        &self.state.status
    }

    async fn get_credential(&self) -> Option<AuthCredential> {
        let Some(record) = self.state.load_token().await else {
            self.state.emit(AuthStatusEvent::expired(
                "Not signed in",
                AuthErrorType::AuthError,
            ));
            return None;
        };

        if let Some(credential) = credential_if_fresh(&record, self.expiry_buffer()) {
            return Some(credential);
        }

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
                    "Session expired; sign in again",
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
        let flow_result = match self.descriptor.flow {
            VendorFlow::AuthorizationCode => self.run_authorization_code(cancel).await,
            VendorFlow::DeviceCode => self.run_device_code(cancel).await,
        };

        let response = match flow_result {
            Ok(response) => response,
            Err(AuthError::Cancelled) => return ConfigureOutcome::cancelled(),
            Err(error) => return ConfigureOutcome::failed(error.to_string()),
        };

        let mut record = response.clone().into_token_data(None);
        let mut auth = self.state.auth();
        if let Err(error) = self.after_authorize(&mut record, &response, &mut auth).await {
            return ConfigureOutcome::failed(error.to_string());
        }

        self.state.persist(auth).await;
        if let Err(error) = self.state.persist_token(&record).await {
            return ConfigureOutcome::failed(error.to_string());
        }

        self.state.emit(AuthStatusEvent::valid());
        ConfigureOutcome::ok(self.state.auth())
    }

    async fn revoke(&self) {
        self.state.clear_token().await;

        // Derived account fields go with the session
        let mut auth = self.state.auth();
        if let Some(base) = auth.vendor_base_mut() {
            base.email = None;
        }
        match &mut auth {
            AuthConfig::AntigravityOauth(antigravity) => {
                antigravity.project_id = None;
                antigravity.tier = None;
            }
            AuthConfig::GoogleGeminiOauth(gemini) => gemini.managed_project_id = None,
            AuthConfig::OpenaiCodex(codex) => codex.account_id = None,
            AuthConfig::QwenCode(qwen) => qwen.resource_url = None,
            AuthConfig::GithubCopilot(copilot) => copilot.account_id = None,
            _ => {}
        }
        self.state.persist(auth).await;
        self.state.emit(AuthStatusEvent::revoked());
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self) -> bool {
        match self.refresh_inner().await {
            Ok(true) => {
                self.state.emit(AuthStatusEvent::valid());
                true
            }
            Ok(false) => {
                self.state.emit(AuthStatusEvent::expired(
                    "Session expired; sign in again",
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
            Some(record) => StatusSnapshot {
                status: if crate::SecretStore::is_oauth2_token_expired(&record, 0) {
                    AuthStatus::Expired
                } else {
                    AuthStatus::Valid
                },
                detail: self
                    .state
                    .auth()
                    .vendor_base()
                    .and_then(|base| base.email.clone()),
                expires_at: record.expires_at,
            },
            None => StatusSnapshot { status: AuthStatus::Revoked, detail: None, expires_at: None },
        }
    }

    async fn status_view_items(&self) -> Vec<StatusViewItem> {
        let mut items = Vec::new();
        let auth = self.state.auth();
        if let Some(base) = auth.vendor_base()
            && let Some(email) = &base.email
        {
            items.push(StatusViewItem { label: "Account".to_string(), detail: email.clone() });
        }
        match &auth {
            AuthConfig::AntigravityOauth(antigravity) => {
                if let Some(project_id) = &antigravity.project_id {
                    items.push(StatusViewItem {
                        label: "Project".to_string(),
                        detail: project_id.clone(),
                    });
                }
                if let Some(tier) = &antigravity.tier {
                    items.push(StatusViewItem { label: "Tier".to_string(), detail: tier.clone() });
                }
            }
            AuthConfig::QwenCode(qwen) => {
                if let Some(resource_url) = &qwen.resource_url {
                    items.push(StatusViewItem {
                        label: "Endpoint".to_string(),
                        detail: resource_url.clone(),
                    });
                }
            }
            _ => {}
        }
        items.push(StatusViewItem {
            label: "Status".to_string(),
            detail: format!("{:?}", self.status_snapshot().await.status),
        });
        items
    }

    async fn summary_detail(&self) -> String {
        let auth = self.state.auth();
        match auth.vendor_base().and_then(|base| base.email.as_deref()) {
            Some(email) => format!("{} ({email})", self.descriptor.label),
            None => self.descriptor.label.to_string(),
        }
    }
}
