//! GitHub Copilot sign-in: device flow, then an exchange of the GitHub
//! OAuth token for a time-limited Copilot API key. The key is what chat
//! requests actually send; the OAuth token only mints new keys.

use relay_domain::{AuthError, AuthErrorType, AuthMethodKind};
use serde::Deserialize;

use super::super::vendor::{VendorDescriptor, VendorFlow};

pub static DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    kind: AuthMethodKind::GithubCopilot,
    label: "GitHub Copilot",
    description: "Sign in with the GitHub account that has Copilot access",
    client_id: "Iv1.b507a08c87ecfe98",
    client_secret: None,
    authorization_url: "https://github.com/login/device/code",
    token_url: "https://github.com/login/oauth/access_token",
    scopes: &["read:user"],
    redirect_uri: None,
    flow: VendorFlow::DeviceCode,
    pkce: false,
    expiry_buffer_secs: 5 * 60,
    user_info_url: None,
    headers: &[
        ("User-Agent", "GitHubCopilotChat/0.26.7"),
        ("Editor-Version", "vscode/1.99.3"),
        ("Editor-Plugin-Version", "copilot-chat/0.26.7"),
    ],
};

/// A minted Copilot API key
#[derive(Debug, Clone, PartialEq)]
pub struct CopilotApiKey {
    pub api_key: String,
    pub expires_at_ms: i64,
}

#[derive(Deserialize)]
struct CopilotTokenResponse {
    token: String,
    /// Epoch seconds
    expires_at: i64,
}

/// Exchanges a GitHub OAuth token for a Copilot API key.
///
/// # Errors
///
/// 401/403 means the account has no active Copilot subscription (auth
/// error, not retryable); other failures classify by status.
pub async fn exchange_api_key(
    client: &reqwest::Client,
    github_token: &str,
    enterprise_url: Option<&str>,
) -> Result<CopilotApiKey, AuthError> {
    let host = enterprise_url.unwrap_or("https://api.github.com");
    let url = format!("{}/copilot_internal/v2/token", host.trim_end_matches('/'));

    let response = client
        .get(&url)
        .bearer_auth(github_token)
        .header("Accept", "application/json")
        .header("User-Agent", "GitHubCopilotChat/0.26.7")
        .header("Editor-Version", "vscode/1.99.3")
        .header("Editor-Plugin-Version", "copilot-chat/0.26.7")
        .send()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::TransientError))?;

    let status = response.status();
    if !status.is_success() {
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AuthError::network(
                "Copilot access denied; check that the account has an active subscription",
                AuthErrorType::AuthError,
            ));
        }
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::network(
            format!("Copilot API key fetch failed ({status}): {body}"),
            crate::classify_status(status.as_u16()),
        ));
    }

    let copilot: CopilotTokenResponse = response
        .json()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::UnknownError))?;

    Ok(CopilotApiKey {
        api_key: copilot.token,
        expires_at_ms: copilot.expires_at * 1000,
    })
}

#[cfg(test)]
mod tests {
    use mockito::Server;
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_exchange_api_key_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/copilot_internal/v2/token")
            .match_header("authorization", "Bearer gho_test")
            .with_status(200)
            .with_body(r#"{"token":"cop_key","expires_at":1700000000}"#)
            .create_async()
            .await;

        let key = exchange_api_key(&reqwest::Client::new(), "gho_test", Some(&server.url()))
            .await
            .unwrap();

        assert_eq!(key.api_key, "cop_key");
        assert_eq!(key.expires_at_ms, 1_700_000_000_000);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_subscription_is_auth_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/copilot_internal/v2/token")
            .with_status(403)
            .create_async()
            .await;

        let error = exchange_api_key(&reqwest::Client::new(), "gho_test", Some(&server.url()))
            .await
            .unwrap_err();

        assert_eq!(error.error_type(), AuthErrorType::AuthError);
    }
}
