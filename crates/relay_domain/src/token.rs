use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API key for authentication
#[derive(
    Clone, Serialize, Deserialize, derive_more::From, derive_more::Deref, PartialEq, Eq, Hash, Debug,
)]
#[serde(transparent)]
pub struct ApiKey(String);

/// OAuth access token
#[derive(
    Clone,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
    derive_more::Deref,
    PartialEq,
    Eq,
    Debug,
)]
#[serde(transparent)]
pub struct AccessToken(String);

/// OAuth refresh token
#[derive(
    Clone, Serialize, Deserialize, derive_more::From, derive_more::Deref, PartialEq, Eq, Debug,
)]
#[serde(transparent)]
pub struct RefreshToken(String);

/// Authorization code from OAuth code flow
#[derive(
    Clone, Serialize, Deserialize, derive_more::From, derive_more::Deref, PartialEq, Eq, Debug,
)]
#[serde(transparent)]
pub struct AuthorizationCode(String);

/// PKCE code verifier
#[derive(
    Clone, Serialize, Deserialize, derive_more::From, derive_more::Deref, PartialEq, Eq, Debug,
)]
#[serde(transparent)]
pub struct PkceVerifier(String);

/// State parameter for CSRF protection in OAuth flows
#[derive(
    Clone, Serialize, Deserialize, derive_more::From, derive_more::Deref, PartialEq, Eq, Debug,
)]
#[serde(transparent)]
pub struct StateParam(String);

/// Identity id distinguishing separate sign-ins under the same method
#[derive(
    Clone,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
    derive_more::Deref,
    PartialEq,
    Eq,
    Hash,
    Debug,
)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Allocates a fresh random identity id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Stored OAuth token record.
///
/// `expires_at` is absolute epoch milliseconds. A record without a refresh
/// token is non-refreshable; a record without `expires_at` is assumed
/// long-lived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2TokenData {
    pub access_token: AccessToken,

    pub token_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,

    /// Absolute expiry in epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl OAuth2TokenData {
    /// Creates a bearer token record expiring `expires_in` seconds from now
    pub fn bearer(access_token: impl Into<AccessToken>, expires_in: Option<u64>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: expires_in.map(|secs| Utc::now().timestamp_millis() + secs as i64 * 1000),
            scope: None,
        }
    }

    /// Sets the refresh token
    pub fn refresh_token(mut self, token: impl Into<RefreshToken>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Expiry as a chrono timestamp, when present
    pub fn expires_at_time(&self) -> Option<DateTime<Utc>> {
        self.expires_at.and_then(DateTime::from_timestamp_millis)
    }
}

/// Resolved credential handed to request adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCredential {
    /// The bearer value (API key or access token)
    pub value: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Absolute expiry in epoch milliseconds, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl AuthCredential {
    /// Creates a credential with no expiry (API keys)
    pub fn key(value: impl Into<String>) -> Self {
        Self { value: value.into(), token_type: None, expires_at: None }
    }

    /// Creates a credential from a stored token record
    pub fn from_token(token: &OAuth2TokenData) -> Self {
        Self {
            value: token.access_token.to_string(),
            token_type: Some(token.token_type.clone()),
            expires_at: token.expires_at,
        }
    }
}
