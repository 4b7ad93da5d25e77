use serde::{Deserialize, Serialize};

use crate::IdentityId;

/// Identifier of an auth method, used as the dispatch and cache key.
///
/// Matches the `method` tag of [`AuthConfig`] one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethodKind {
    None,
    ApiKey,
    Oauth2,
    AntigravityOauth,
    GoogleGeminiOauth,
    OpenaiCodex,
    ClaudeCode,
    QwenCode,
    IflowCli,
    GithubCopilot,
    GoogleVertexAiAuth,
}

impl AuthMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApiKey => "api-key",
            Self::Oauth2 => "oauth2",
            Self::AntigravityOauth => "antigravity-oauth",
            Self::GoogleGeminiOauth => "google-gemini-oauth",
            Self::OpenaiCodex => "openai-codex",
            Self::ClaudeCode => "claude-code",
            Self::QwenCode => "qwen-code",
            Self::IflowCli => "iflow-cli",
            Self::GithubCopilot => "github-copilot",
            Self::GoogleVertexAiAuth => "google-vertex-ai-auth",
        }
    }

    /// All methods whose token records must stay in the secret store
    pub fn is_oauth_backed(&self) -> bool {
        !matches!(self, Self::None | Self::ApiKey | Self::GoogleVertexAiAuth)
    }
}

impl std::fmt::Display for AuthMethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API key configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyAuth {
    /// Display label shown in provider lists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Plaintext key or a secret reference, absent before configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Generic OAuth2 configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Auth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<IdentityId>,

    /// Inline token record JSON or a secret reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    pub oauth: crate::OAuth2Config,
}

/// Fields common to every vendor OAuth variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorAuthBase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<IdentityId>,

    /// Inline token record JSON or a secret reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Account email learned from the vendor's user-info endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntigravityAuth {
    #[serde(flatten)]
    pub base: VendorAuthBase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Subscription tier reported by onboarding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCliAuth {
    #[serde(flatten)]
    pub base: VendorAuthBase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Project id assigned by the server for free-tier accounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_project_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodexAuth {
    #[serde(flatten)]
    pub base: VendorAuthBase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeCodeAuth {
    #[serde(flatten)]
    pub base: VendorAuthBase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QwenCodeAuth {
    #[serde(flatten)]
    pub base: VendorAuthBase,

    /// API base URL returned with the token grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IflowCliAuth {
    #[serde(flatten)]
    pub base: VendorAuthBase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubCopilotAuth {
    #[serde(flatten)]
    pub base: VendorAuthBase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// GitHub Enterprise host, when not using github.com
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise_url: Option<String>,
}

/// Vertex AI authentication, sub-tagged on `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum VertexAuth {
    /// Application default credentials from the local gcloud environment
    Adc {
        #[serde(skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    ServiceAccount {
        /// Service account key JSON or a secret reference
        service_account_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    ApiKey {
        /// Plaintext key or a secret reference
        api_key: String,
    },
}

/// Authentication configuration, tagged on `method`.
///
/// The finite variant set is public API (spec'd per provider kind); request
/// adapters and the taxonomy dispatch on it rather than through an open
/// trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum AuthConfig {
    None,
    ApiKey(ApiKeyAuth),
    Oauth2(OAuth2Auth),
    AntigravityOauth(AntigravityAuth),
    GoogleGeminiOauth(GeminiCliAuth),
    OpenaiCodex(CodexAuth),
    ClaudeCode(ClaudeCodeAuth),
    QwenCode(QwenCodeAuth),
    IflowCli(IflowCliAuth),
    GithubCopilot(GithubCopilotAuth),
    GoogleVertexAiAuth(VertexAuth),
}

impl AuthConfig {
    pub fn method(&self) -> AuthMethodKind {
        match self {
            Self::None => AuthMethodKind::None,
            Self::ApiKey(_) => AuthMethodKind::ApiKey,
            Self::Oauth2(_) => AuthMethodKind::Oauth2,
            Self::AntigravityOauth(_) => AuthMethodKind::AntigravityOauth,
            Self::GoogleGeminiOauth(_) => AuthMethodKind::GoogleGeminiOauth,
            Self::OpenaiCodex(_) => AuthMethodKind::OpenaiCodex,
            Self::ClaudeCode(_) => AuthMethodKind::ClaudeCode,
            Self::QwenCode(_) => AuthMethodKind::QwenCode,
            Self::IflowCli(_) => AuthMethodKind::IflowCli,
            Self::GithubCopilot(_) => AuthMethodKind::GithubCopilot,
            Self::GoogleVertexAiAuth(_) => AuthMethodKind::GoogleVertexAiAuth,
        }
    }

    /// The shared vendor fields, for vendor OAuth variants
    pub fn vendor_base(&self) -> Option<&VendorAuthBase> {
        match self {
            Self::AntigravityOauth(auth) => Some(&auth.base),
            Self::GoogleGeminiOauth(auth) => Some(&auth.base),
            Self::OpenaiCodex(auth) => Some(&auth.base),
            Self::ClaudeCode(auth) => Some(&auth.base),
            Self::QwenCode(auth) => Some(&auth.base),
            Self::IflowCli(auth) => Some(&auth.base),
            Self::GithubCopilot(auth) => Some(&auth.base),
            _ => None,
        }
    }

    pub fn vendor_base_mut(&mut self) -> Option<&mut VendorAuthBase> {
        match self {
            Self::AntigravityOauth(auth) => Some(&mut auth.base),
            Self::GoogleGeminiOauth(auth) => Some(&mut auth.base),
            Self::OpenaiCodex(auth) => Some(&mut auth.base),
            Self::ClaudeCode(auth) => Some(&mut auth.base),
            Self::QwenCode(auth) => Some(&mut auth.base),
            Self::IflowCli(auth) => Some(&mut auth.base),
            Self::GithubCopilot(auth) => Some(&mut auth.base),
            _ => None,
        }
    }

    /// The token field (inline record or reference), wherever it lives
    pub fn token_field(&self) -> Option<&str> {
        match self {
            Self::Oauth2(auth) => auth.token.as_deref(),
            _ => self.vendor_base().and_then(|base| base.token.as_deref()),
        }
    }

    pub fn set_token_field(&mut self, value: Option<String>) {
        match self {
            Self::Oauth2(auth) => auth.token = value,
            _ => {
                if let Some(base) = self.vendor_base_mut() {
                    base.token = value;
                }
            }
        }
    }

    pub fn identity_id(&self) -> Option<&IdentityId> {
        match self {
            Self::Oauth2(auth) => auth.identity_id.as_ref(),
            _ => self.vendor_base().and_then(|base| base.identity_id.as_ref()),
        }
    }

    pub fn set_identity_id(&mut self, id: IdentityId) {
        match self {
            Self::Oauth2(auth) => auth.identity_id = Some(id),
            _ => {
                if let Some(base) = self.vendor_base_mut() {
                    base.identity_id = Some(id);
                }
            }
        }
    }
}
