use std::collections::HashMap;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::AuthConfig;

/// Per-provider network options applied to outgoing requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase")]
#[setters(strip_option, into)]
pub struct NetworkOptions {
    /// Extra headers merged into every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,

    /// Extra top-level body fields merged into every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_body: Option<serde_json::Map<String, serde_json::Value>>,

    /// Request timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A model exposed by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A named LLM endpoint.
///
/// Created by the user, mutated both by user edits and by auth-method
/// providers writing back derived fields. Lives in a stable-ordered list
/// keyed by unique `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase")]
#[setters(strip_option, into)]
pub struct ProviderConfig {
    pub name: String,

    pub base_url: String,

    pub auth: AuthConfig,

    #[serde(flatten)]
    pub network: NetworkOptions,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<ModelEntry>>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth,
            network: NetworkOptions::default(),
            models: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ApiKeyAuth;

    #[test]
    fn test_network_options_flattened() {
        let provider = ProviderConfig::new(
            "X",
            "https://api.example",
            AuthConfig::ApiKey(ApiKeyAuth::default()),
        )
        .network(NetworkOptions::default().timeout_ms(30_000u64));

        let json = serde_json::to_value(&provider).unwrap();
        assert_eq!(json["timeoutMs"], 30_000);
        assert_eq!(json["auth"]["method"], "api-key");

        let parsed: ProviderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, provider);
    }
}
