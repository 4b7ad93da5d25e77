use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// Endpoints and scopes shared by every OAuth2 grant type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase")]
#[setters(strip_option, into)]
pub struct OAuth2Endpoints {
    pub token_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl OAuth2Endpoints {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self { token_url: token_url.into(), revocation_url: None, scopes: None }
    }

    /// Space-joined scope string, empty when no scopes are configured
    pub fn scope_string(&self) -> String {
        self.scopes.as_deref().unwrap_or_default().join(" ")
    }
}

/// OAuth2 grant configuration, tagged on `grantType`.
///
/// The finite grant set is public API; adapters match on it rather than
/// dispatching through an open trait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "grantType",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum OAuth2Config {
    AuthorizationCode {
        authorization_url: String,
        client_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_secret: Option<String>,
        /// PKCE is on unless explicitly disabled
        #[serde(default = "default_pkce")]
        pkce: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        redirect_uri: Option<String>,
        #[serde(flatten)]
        endpoints: OAuth2Endpoints,
    },
    ClientCredentials {
        client_id: String,
        client_secret: String,
        #[serde(flatten)]
        endpoints: OAuth2Endpoints,
    },
    DeviceCode {
        device_authorization_url: String,
        client_id: String,
        #[serde(flatten)]
        endpoints: OAuth2Endpoints,
    },
}

fn default_pkce() -> bool {
    true
}

impl OAuth2Config {
    pub fn endpoints(&self) -> &OAuth2Endpoints {
        match self {
            Self::AuthorizationCode { endpoints, .. }
            | Self::ClientCredentials { endpoints, .. }
            | Self::DeviceCode { endpoints, .. } => endpoints,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::AuthorizationCode { client_id, .. }
            | Self::ClientCredentials { client_id, .. }
            | Self::DeviceCode { client_id, .. } => client_id,
        }
    }

    /// The client secret, for grants that carry one.
    ///
    /// May itself be a secret reference; callers resolve it through the
    /// secret store before use.
    pub fn client_secret(&self) -> Option<&str> {
        match self {
            Self::AuthorizationCode { client_secret, .. } => client_secret.as_deref(),
            Self::ClientCredentials { client_secret, .. } => Some(client_secret),
            Self::DeviceCode { .. } => None,
        }
    }

    /// Replaces the client secret in place, ignoring grants without one
    pub fn set_client_secret(&mut self, value: Option<String>) {
        match self {
            Self::AuthorizationCode { client_secret, .. } => *client_secret = value,
            Self::ClientCredentials { client_secret, .. } => {
                if let Some(value) = value {
                    *client_secret = value;
                }
            }
            Self::DeviceCode { .. } => {}
        }
    }

    /// Whether refresh is meaningful for this grant. Device-code tokens are
    /// refreshable only through their refresh token; client-credentials
    /// re-runs the token request instead.
    pub fn supports_refresh(&self) -> bool {
        !matches!(self, Self::DeviceCode { .. })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_grant_type_tag_round_trip() {
        let config = OAuth2Config::AuthorizationCode {
            authorization_url: "https://auth.example/authorize".to_string(),
            client_id: "c".to_string(),
            client_secret: None,
            pkce: true,
            redirect_uri: None,
            endpoints: OAuth2Endpoints::new("https://auth.example/token"),
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["grantType"], "authorization_code");
        assert_eq!(json["tokenUrl"], "https://auth.example/token");

        let parsed: OAuth2Config = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_pkce_defaults_on() {
        let json = serde_json::json!({
            "grantType": "authorization_code",
            "authorizationUrl": "https://auth.example/authorize",
            "clientId": "c",
            "tokenUrl": "https://auth.example/token",
        });

        let config: OAuth2Config = serde_json::from_value(json).unwrap();
        match config {
            OAuth2Config::AuthorizationCode { pkce, .. } => assert!(pkce),
            other => panic!("unexpected grant: {other:?}"),
        }
    }

    #[test]
    fn test_scope_string() {
        let endpoints = OAuth2Endpoints::new("https://auth.example/token")
            .scopes(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(endpoints.scope_string(), "a b");
        assert_eq!(
            OAuth2Endpoints::new("https://auth.example/token").scope_string(),
            ""
        );
    }
}
