//! Gemini CLI sign-in: the same Google OAuth application the CLI ships,
//! plus the Code-Assist project lookup.

use relay_domain::{AuthError, AuthErrorType, AuthMethodKind};
use serde_json::{Value, json};

use super::super::vendor::{VendorDescriptor, VendorFlow};

pub static DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    kind: AuthMethodKind::GoogleGeminiOauth,
    label: "Gemini CLI",
    description: "Sign in with the Google account used by the Gemini CLI",
    client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
    client_secret: Some("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"),
    authorization_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &[
        "https://www.googleapis.com/auth/cloud-platform",
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
    ],
    redirect_uri: None,
    flow: VendorFlow::AuthorizationCode,
    pkce: true,
    expiry_buffer_secs: 5 * 60,
    user_info_url: Some("https://www.googleapis.com/oauth2/v2/userinfo"),
    headers: &[],
};

/// Result of `loadCodeAssist` for a Gemini CLI account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeAssistLoad {
    /// Server-assigned project for free-tier accounts
    pub managed_project_id: Option<String>,
}

/// Asks Code-Assist which project backs this account. Accounts with a
/// user-configured project send it along; free-tier accounts get a managed
/// project back.
pub async fn load_code_assist(
    client: &reqwest::Client,
    access_token: &str,
    project_id: Option<&str>,
) -> Result<CodeAssistLoad, AuthError> {
    let mut body = json!({
        "metadata": {
            "ideType": "IDE_UNSPECIFIED",
            "platform": "PLATFORM_UNSPECIFIED",
            "pluginType": "GEMINI",
        },
    });
    if let Some(project_id) = project_id {
        body["cloudaicompanionProject"] = Value::String(project_id.to_string());
    }

    let url = format!(
        "{}/v1internal:loadCodeAssist",
        super::antigravity::CODE_ASSIST_ENDPOINT
    );
    let response = client
        .post(&url)
        .bearer_auth(access_token)
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::TransientError))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::network(
            format!("loadCodeAssist failed ({status}): {body}"),
            crate::classify_status(status.as_u16()),
        ));
    }

    let loaded: Value = response
        .json()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::UnknownError))?;

    Ok(CodeAssistLoad {
        managed_project_id: loaded
            .get("cloudaicompanionProject")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
