//! Static per-method helpers used by the import/export/duplicate/cleanup
//! pipelines.
//!
//! One dispatch-table row per auth method: a record of function pointers
//! rather than a trait hierarchy, since the method set is finite and public
//! API. Vendor OAuth methods share one row implementation.

use futures::future::BoxFuture;
use relay_domain::{
    AuthConfig, AuthError, AuthMethodKind, IdentityId, OAuth2Config, OAuth2TokenData,
    SecretNamespace, SecretRef,
};

use crate::SecretStore;

/// Context handed to `normalize_on_import` and `prepare_for_duplicate`
pub struct ImportOptions<'a> {
    pub store: &'a SecretStore,
    /// Target storage mode: true inlines material for methods that allow it
    pub store_secrets_in_settings: bool,
    /// Prior config for the same provider+method, for reference reuse
    pub existing: Option<&'a AuthConfig>,
}

type SyncOp = fn(&mut AuthConfig);
type StoreOp = for<'a> fn(&'a mut AuthConfig, &'a SecretStore) -> BoxFuture<'a, Result<(), AuthError>>;
type ImportOp =
    for<'a> fn(&'a mut AuthConfig, ImportOptions<'a>) -> BoxFuture<'a, Result<(), AuthError>>;
type DiscardOp = for<'a> fn(&'a AuthConfig, &'a SecretStore) -> BoxFuture<'a, Result<(), AuthError>>;

/// Dispatch-table row for one auth method
pub struct MethodOps {
    /// Whether this method's sensitive material may live inline in synced
    /// settings. OAuth-backed methods answer false: refresh-token races
    /// across synced settings are unsafe.
    pub supports_sensitive_data_in_settings: bool,

    /// Removes tokens and secret values, keeping structural fields
    pub redact_for_export: SyncOp,

    /// Resolves secret references into inline plaintext
    pub resolve_for_export: StoreOp,

    /// Converts between inline and referenced forms for the ambient mode
    pub normalize_on_import: ImportOp,

    /// Clears tokens, allocates a fresh identity, re-homes secrets
    pub prepare_for_duplicate: ImportOp,

    /// Releases every secret referenced by the config
    pub cleanup_on_discard: DiscardOp,
}

/// Returns the dispatch-table row for a method
pub fn ops_for(method: AuthMethodKind) -> &'static MethodOps {
    match method {
        AuthMethodKind::None => &NONE_OPS,
        AuthMethodKind::ApiKey => &API_KEY_OPS,
        AuthMethodKind::GoogleVertexAiAuth => &VERTEX_OPS,
        AuthMethodKind::Oauth2 => &OAUTH2_OPS,
        _ => &VENDOR_OPS,
    }
}

static NONE_OPS: MethodOps = MethodOps {
    supports_sensitive_data_in_settings: true,
    redact_for_export: |_| {},
    resolve_for_export: |_, _| Box::pin(async { Ok(()) }),
    normalize_on_import: |_, _| Box::pin(async { Ok(()) }),
    prepare_for_duplicate: |_, _| Box::pin(async { Ok(()) }),
    cleanup_on_discard: |_, _| Box::pin(async { Ok(()) }),
};

static API_KEY_OPS: MethodOps = MethodOps {
    supports_sensitive_data_in_settings: true,
    redact_for_export: redact_api_key,
    resolve_for_export: resolve_api_key,
    normalize_on_import: normalize_api_key,
    prepare_for_duplicate: duplicate_api_key,
    cleanup_on_discard: cleanup_api_key,
};

static OAUTH2_OPS: MethodOps = MethodOps {
    supports_sensitive_data_in_settings: false,
    redact_for_export: redact_oauth2,
    resolve_for_export: resolve_oauth2,
    normalize_on_import: normalize_oauth2,
    prepare_for_duplicate: duplicate_oauth2,
    cleanup_on_discard: cleanup_oauth2,
};

static VENDOR_OPS: MethodOps = MethodOps {
    supports_sensitive_data_in_settings: false,
    redact_for_export: redact_vendor,
    resolve_for_export: resolve_vendor,
    normalize_on_import: normalize_vendor,
    prepare_for_duplicate: duplicate_vendor,
    cleanup_on_discard: cleanup_vendor,
};

static VERTEX_OPS: MethodOps = MethodOps {
    supports_sensitive_data_in_settings: true,
    redact_for_export: redact_vertex,
    resolve_for_export: resolve_vertex,
    normalize_on_import: normalize_vertex,
    prepare_for_duplicate: normalize_vertex,
    cleanup_on_discard: cleanup_vertex,
};

/// Every secret reference appearing anywhere in an auth config. Drives the
/// orphan sweep and discard cleanup.
pub fn collect_refs(auth: &AuthConfig) -> Vec<SecretRef> {
    let mut refs = Vec::new();
    let mut push = |value: Option<&str>| {
        if let Some(reference) = value.and_then(SecretRef::parse) {
            refs.push(reference);
        }
    };

    match auth {
        AuthConfig::None => {}
        AuthConfig::ApiKey(api) => push(api.api_key.as_deref()),
        AuthConfig::Oauth2(oauth) => {
            push(oauth.token.as_deref());
            push(oauth.oauth.client_secret());
        }
        AuthConfig::GoogleVertexAiAuth(vertex) => match vertex {
            relay_domain::VertexAuth::Adc { .. } => {}
            relay_domain::VertexAuth::ServiceAccount { service_account_key, .. } => {
                push(Some(service_account_key));
            }
            relay_domain::VertexAuth::ApiKey { api_key } => push(Some(api_key)),
        },
        _ => push(auth.token_field()),
    }
    refs
}

// ---- api-key ----

fn redact_api_key(auth: &mut AuthConfig) {
    if let AuthConfig::ApiKey(api) = auth {
        api.api_key = None;
    }
}

fn resolve_api_key<'a>(
    auth: &'a mut AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        let AuthConfig::ApiKey(api) = auth else { return Ok(()) };
        if let Some(reference) = api.api_key.as_deref().and_then(SecretRef::parse) {
            let plaintext = store
                .get_api_key(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?
                .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
            api.api_key = Some(plaintext);
        }
        Ok(())
    })
}

fn normalize_api_key<'a>(
    auth: &'a mut AuthConfig,
    options: ImportOptions<'a>,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        let AuthConfig::ApiKey(api) = auth else { return Ok(()) };
        let Some(value) = api.api_key.clone() else { return Ok(()) };

        match (SecretRef::parse(&value), options.store_secrets_in_settings) {
            // Already in the right form
            (None, true) | (Some(_), false) => Ok(()),
            (Some(reference), true) => {
                let plaintext = options
                    .store
                    .get_api_key(&reference)
                    .await
                    .map_err(|error| AuthError::Config(error.to_string()))?
                    .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
                api.api_key = Some(plaintext);
                options
                    .store
                    .delete_api_key(&reference)
                    .await
                    .map_err(|error| AuthError::Config(error.to_string()))?;
                Ok(())
            }
            (None, false) => {
                let reference = reusable_ref(options.existing, SecretNamespace::ApiKey)
                    .unwrap_or_else(|| options.store.create_ref(SecretNamespace::ApiKey));
                options
                    .store
                    .set_api_key(&reference, &value)
                    .await
                    .map_err(|error| AuthError::Config(error.to_string()))?;
                api.api_key = Some(reference.to_string());
                Ok(())
            }
        }
    })
}

fn duplicate_api_key<'a>(
    auth: &'a mut AuthConfig,
    options: ImportOptions<'a>,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        // A duplicate must own its secret: copy the value under a new
        // reference so discarding either config cannot strand the other.
        let AuthConfig::ApiKey(api) = &mut *auth else { return Ok(()) };
        if let Some(reference) = api.api_key.as_deref().and_then(SecretRef::parse) {
            let plaintext = options
                .store
                .get_api_key(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?
                .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
            let fresh = options.store.create_ref(SecretNamespace::ApiKey);
            options
                .store
                .set_api_key(&fresh, &plaintext)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?;
            api.api_key = Some(fresh.to_string());
        }
        normalize_api_key(auth, options).await
    })
}

fn cleanup_api_key<'a>(
    auth: &'a AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        let AuthConfig::ApiKey(api) = auth else { return Ok(()) };
        if let Some(reference) = api.api_key.as_deref().and_then(SecretRef::parse) {
            store
                .delete_api_key(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?;
        }
        Ok(())
    })
}

// ---- generic oauth2 ----

fn redact_oauth2(auth: &mut AuthConfig) {
    if let AuthConfig::Oauth2(oauth) = auth {
        oauth.token = None;
        match &mut oauth.oauth {
            OAuth2Config::AuthorizationCode { client_secret, .. } => *client_secret = None,
            OAuth2Config::ClientCredentials { client_secret, .. } => client_secret.clear(),
            OAuth2Config::DeviceCode { .. } => {}
        }
    }
}

fn resolve_oauth2<'a>(
    auth: &'a mut AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        resolve_token_field(auth, store).await?;
        let AuthConfig::Oauth2(oauth) = auth else { return Ok(()) };
        if let Some(reference) = oauth.oauth.client_secret().and_then(SecretRef::parse) {
            let plaintext = store
                .get_oauth2_client_secret(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?
                .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
            oauth.oauth.set_client_secret(Some(plaintext));
        }
        Ok(())
    })
}

fn normalize_oauth2<'a>(
    auth: &'a mut AuthConfig,
    options: ImportOptions<'a>,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        normalize_token_field(auth, &options).await?;

        // Client secrets follow the token into the store: this method does
        // not support sensitive material in settings.
        let AuthConfig::Oauth2(oauth) = auth else { return Ok(()) };
        let Some(secret) = oauth.oauth.client_secret().map(str::to_string) else {
            return Ok(());
        };
        if SecretRef::is_reference(&secret) {
            return Ok(());
        }
        let reference = reusable_ref(options.existing, SecretNamespace::OAuth2ClientSecret)
            .unwrap_or_else(|| options.store.create_ref(SecretNamespace::OAuth2ClientSecret));
        options
            .store
            .set_oauth2_client_secret(&reference, &secret)
            .await
            .map_err(|error| AuthError::Config(error.to_string()))?;
        oauth.oauth.set_client_secret(Some(reference.to_string()));
        Ok(())
    })
}

fn duplicate_oauth2<'a>(
    auth: &'a mut AuthConfig,
    options: ImportOptions<'a>,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        auth.set_token_field(None);
        auth.set_identity_id(IdentityId::generate());

        // Re-home a referenced client secret under a fresh reference
        if let AuthConfig::Oauth2(oauth) = &mut *auth
            && let Some(reference) = oauth.oauth.client_secret().and_then(SecretRef::parse)
        {
            let plaintext = options
                .store
                .get_oauth2_client_secret(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?
                .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
            oauth.oauth.set_client_secret(Some(plaintext));
        }
        normalize_oauth2(auth, options).await
    })
}

fn cleanup_oauth2<'a>(
    auth: &'a AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        for reference in collect_refs(auth) {
            store
                .delete_ref(&reference)
                .await
                .map_err(|error| AuthError::Config(error.to_string()))?;
        }
        Ok(())
    })
}

// ---- vendor oauth family ----

fn redact_vendor(auth: &mut AuthConfig) {
    auth.set_token_field(None);
}

fn resolve_vendor<'a>(
    auth: &'a mut AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(resolve_token_field(auth, store))
}

fn normalize_vendor<'a>(
    auth: &'a mut AuthConfig,
    options: ImportOptions<'a>,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move { normalize_token_field(auth, &options).await })
}

fn duplicate_vendor<'a>(
    auth: &'a mut AuthConfig,
    _options: ImportOptions<'a>,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        auth.set_token_field(None);
        auth.set_identity_id(IdentityId::generate());
        Ok(())
    })
}

fn cleanup_vendor<'a>(
    auth: &'a AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    cleanup_oauth2(auth, store)
}

// ---- vertex ----

fn redact_vertex(auth: &mut AuthConfig) {
    if let AuthConfig::GoogleVertexAiAuth(vertex) = auth {
        match vertex {
            relay_domain::VertexAuth::Adc { .. } => {}
            relay_domain::VertexAuth::ServiceAccount { service_account_key, .. } => {
                service_account_key.clear();
            }
            relay_domain::VertexAuth::ApiKey { api_key } => api_key.clear(),
        }
    }
}

fn resolve_vertex<'a>(
    auth: &'a mut AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        let AuthConfig::GoogleVertexAiAuth(vertex) = auth else { return Ok(()) };
        match vertex {
            relay_domain::VertexAuth::Adc { .. } => Ok(()),
            relay_domain::VertexAuth::ServiceAccount { service_account_key, .. } => {
                if let Some(reference) = SecretRef::parse(service_account_key) {
                    *service_account_key = store
                        .get_oauth2_client_secret(&reference)
                        .await
                        .map_err(|error| AuthError::Config(error.to_string()))?
                        .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
                }
                Ok(())
            }
            relay_domain::VertexAuth::ApiKey { api_key } => {
                if let Some(reference) = SecretRef::parse(api_key) {
                    *api_key = store
                        .get_api_key(&reference)
                        .await
                        .map_err(|error| AuthError::Config(error.to_string()))?
                        .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
                }
                Ok(())
            }
        }
    })
}

fn normalize_vertex<'a>(
    auth: &'a mut AuthConfig,
    options: ImportOptions<'a>,
) -> BoxFuture<'a, Result<(), AuthError>> {
    Box::pin(async move {
        if options.store_secrets_in_settings {
            return resolve_vertex(auth, options.store).await;
        }
        let AuthConfig::GoogleVertexAiAuth(vertex) = auth else { return Ok(()) };
        match vertex {
            relay_domain::VertexAuth::Adc { .. } => Ok(()),
            relay_domain::VertexAuth::ServiceAccount { service_account_key, .. } => {
                if !SecretRef::is_reference(service_account_key) {
                    let reference =
                        reusable_ref(options.existing, SecretNamespace::OAuth2ClientSecret)
                            .unwrap_or_else(|| {
                                options.store.create_ref(SecretNamespace::OAuth2ClientSecret)
                            });
                    options
                        .store
                        .set_oauth2_client_secret(&reference, service_account_key)
                        .await
                        .map_err(|error| AuthError::Config(error.to_string()))?;
                    *service_account_key = reference.to_string();
                }
                Ok(())
            }
            relay_domain::VertexAuth::ApiKey { api_key } => {
                if !SecretRef::is_reference(api_key) {
                    let reference = reusable_ref(options.existing, SecretNamespace::ApiKey)
                        .unwrap_or_else(|| options.store.create_ref(SecretNamespace::ApiKey));
                    options
                        .store
                        .set_api_key(&reference, api_key)
                        .await
                        .map_err(|error| AuthError::Config(error.to_string()))?;
                    *api_key = reference.to_string();
                }
                Ok(())
            }
        }
    })
}

fn cleanup_vertex<'a>(
    auth: &'a AuthConfig,
    store: &'a SecretStore,
) -> BoxFuture<'a, Result<(), AuthError>> {
    cleanup_oauth2(auth, store)
}

// ---- shared token-field helpers ----

async fn resolve_token_field(auth: &mut AuthConfig, store: &SecretStore) -> Result<(), AuthError> {
    if let Some(reference) = auth.token_field().and_then(SecretRef::parse) {
        let record = store
            .get_oauth2_token(&reference)
            .await
            .map_err(|error| AuthError::Config(error.to_string()))?
            .ok_or_else(|| AuthError::MissingSecret(reference.to_string()))?;
        let json =
            serde_json::to_string(&record).map_err(|error| AuthError::Config(error.to_string()))?;
        auth.set_token_field(Some(json));
    }
    Ok(())
}

/// Token records never stay inline: OAuth-backed methods keep them in the
/// secret store regardless of the ambient mode.
async fn normalize_token_field(
    auth: &mut AuthConfig,
    options: &ImportOptions<'_>,
) -> Result<(), AuthError> {
    let Some(value) = auth.token_field().map(str::to_string) else {
        return Ok(());
    };
    if SecretRef::is_reference(&value) {
        return Ok(());
    }
    let record: OAuth2TokenData =
        serde_json::from_str(&value).map_err(|error| AuthError::Config(error.to_string()))?;
    let reference = reusable_ref(options.existing, SecretNamespace::OAuth2Token)
        .unwrap_or_else(|| options.store.create_ref(SecretNamespace::OAuth2Token));
    options
        .store
        .set_oauth2_token(&reference, &record)
        .await
        .map_err(|error| AuthError::Config(error.to_string()))?;
    auth.set_token_field(Some(reference.to_string()));
    Ok(())
}

/// A reference from the prior config worth reusing, namespace permitting
fn reusable_ref(existing: Option<&AuthConfig>, namespace: SecretNamespace) -> Option<SecretRef> {
    existing
        .into_iter()
        .flat_map(collect_refs)
        .find(|reference| reference.namespace() == Some(namespace))
}
