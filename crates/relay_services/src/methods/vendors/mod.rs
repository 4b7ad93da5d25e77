//! Vendor OAuth descriptors and vendor-specific endpoints.
//!
//! Each module hardcodes one vendor's client id, URLs, scopes and headers,
//! plus whatever extra endpoints that vendor needs (Antigravity project
//! onboarding, Copilot API-key minting, Code-Assist project lookup).

use relay_domain::{AuthError, AuthErrorType, AuthMethodKind};
use serde::Deserialize;

use super::vendor::VendorDescriptor;

pub mod antigravity;
pub mod claude_code;
pub mod gemini_cli;
pub mod github_copilot;
pub mod iflow_cli;
pub mod openai_codex;
pub mod qwen_code;

/// Resolves the static descriptor for a vendor method
pub fn descriptor_for(kind: AuthMethodKind) -> Option<&'static VendorDescriptor> {
    match kind {
        AuthMethodKind::AntigravityOauth => Some(&antigravity::DESCRIPTOR),
        AuthMethodKind::GoogleGeminiOauth => Some(&gemini_cli::DESCRIPTOR),
        AuthMethodKind::ClaudeCode => Some(&claude_code::DESCRIPTOR),
        AuthMethodKind::OpenaiCodex => Some(&openai_codex::DESCRIPTOR),
        AuthMethodKind::QwenCode => Some(&qwen_code::DESCRIPTOR),
        AuthMethodKind::IflowCli => Some(&iflow_cli::DESCRIPTOR),
        AuthMethodKind::GithubCopilot => Some(&github_copilot::DESCRIPTOR),
        _ => None,
    }
}

#[derive(Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    email: Option<String>,
}

/// Fetches the signed-in account's email from a vendor user-info endpoint
pub async fn fetch_user_email(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<Option<String>, AuthError> {
    let response = client
        .get(url)
        .bearer_auth(access_token)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::TransientError))?;

    if !response.status().is_success() {
        return Err(AuthError::network(
            format!("user-info query failed: HTTP {}", response.status()),
            crate::classify_status(response.status().as_u16()),
        ));
    }

    let info: UserInfoResponse = response
        .json()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::UnknownError))?;
    Ok(info.email)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_every_vendor_method_has_a_descriptor() {
        let vendor_kinds = [
            AuthMethodKind::AntigravityOauth,
            AuthMethodKind::GoogleGeminiOauth,
            AuthMethodKind::ClaudeCode,
            AuthMethodKind::OpenaiCodex,
            AuthMethodKind::QwenCode,
            AuthMethodKind::IflowCli,
            AuthMethodKind::GithubCopilot,
        ];
        for kind in vendor_kinds {
            let descriptor = descriptor_for(kind).unwrap();
            assert_eq!(descriptor.kind, kind);
            assert!(!descriptor.client_id.is_empty());
            assert!(descriptor.token_url.starts_with("https://"));
        }
        assert!(descriptor_for(AuthMethodKind::ApiKey).is_none());
    }

    #[test]
    fn test_expiry_buffers_match_vendor_policy() {
        // iFlow pre-refreshes a day early, Claude Code four hours
        assert_eq!(iflow_cli::DESCRIPTOR.expiry_buffer_secs, 24 * 60 * 60);
        assert_eq!(claude_code::DESCRIPTOR.expiry_buffer_secs, 4 * 60 * 60);
        assert_eq!(antigravity::DESCRIPTOR.expiry_buffer_secs, 5 * 60);
    }
}
