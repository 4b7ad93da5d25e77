//! Google Antigravity sign-in: Google OAuth plus Code-Assist onboarding.

use std::time::Duration;

use relay_domain::{AuthError, AuthErrorType, AuthMethodKind};
use serde_json::{Value, json};
use tracing::debug;

use super::super::vendor::{VendorDescriptor, VendorFlow};

/// Code-Assist API surface shared with the request adapter
pub const CODE_ASSIST_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";

/// Fallback project id used when onboarding reports none.
///
/// Whether it is valid for every account is a server-side policy; requests
/// carrying it may still be rejected for restricted accounts.
pub const DEFAULT_PROJECT_ID: &str = "rising-fact-p41";

pub const ONBOARD_POLL_DELAY_MS: u64 = 2_000;
pub const ONBOARD_MAX_ATTEMPTS: u32 = 10;

pub static DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    kind: AuthMethodKind::AntigravityOauth,
    label: "Google Antigravity",
    description: "Sign in with the Google account used by Antigravity",
    client_id: "1071006060591-tmhssin8h2jbqu0ji7lbhbrhfkb1qqc5.apps.googleusercontent.com",
    client_secret: Some("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"),
    authorization_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &[
        "https://www.googleapis.com/auth/cloud-platform",
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
    ],
    // Antigravity registers a loopback listener on a fixed port
    redirect_uri: Some("http://localhost:51121/oauth-callback"),
    flow: VendorFlow::AuthorizationCode,
    pkce: true,
    expiry_buffer_secs: 5 * 60,
    user_info_url: Some("https://www.googleapis.com/oauth2/v2/userinfo"),
    headers: &[],
};

/// What onboarding learned about the account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Onboarding {
    pub project_id: Option<String>,
    pub tier: Option<String>,
}

/// Loads the account's Code-Assist state and, for accounts that have not
/// been provisioned yet, polls `v1internal:onboardUser` until it reports
/// `done: true` (bounded attempts).
///
/// Best-effort: termination conditions come from server responses whose
/// schema is undocumented, so unexpected shapes retry until the bound.
pub async fn onboard(client: &reqwest::Client, access_token: &str) -> Result<Onboarding, AuthError> {
    let metadata = json!({
        "ideType": "IDE_UNSPECIFIED",
        "platform": "PLATFORM_UNSPECIFIED",
        "pluginType": "GEMINI",
    });

    let load: Value = post_internal(
        client,
        access_token,
        "loadCodeAssist",
        &json!({ "metadata": metadata }),
    )
    .await?;

    let tier = load
        .pointer("/currentTier/id")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(project_id) = load
        .get("cloudaicompanionProject")
        .and_then(Value::as_str)
        .map(str::to_string)
    {
        return Ok(Onboarding { project_id: Some(project_id), tier });
    }

    // Not provisioned: drive onboarding until the long-running operation
    // completes or the attempt budget runs out.
    let tier_id = tier.clone().unwrap_or_else(|| "free-tier".to_string());
    let body = json!({
        "tierId": tier_id,
        "metadata": metadata,
    });

    for attempt in 0..ONBOARD_MAX_ATTEMPTS {
        let operation: Value = post_internal(client, access_token, "onboardUser", &body).await?;

        if operation.get("done").and_then(Value::as_bool) == Some(true) {
            let project_id = operation
                .pointer("/response/cloudaicompanionProject/id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(DEFAULT_PROJECT_ID.to_string()));
            return Ok(Onboarding { project_id, tier });
        }

        debug!(attempt, "onboarding not complete; polling again");
        tokio::time::sleep(Duration::from_millis(ONBOARD_POLL_DELAY_MS)).await;
    }

    Err(AuthError::CompletionFailed(format!(
        "account onboarding did not complete after {ONBOARD_MAX_ATTEMPTS} attempts"
    )))
}

async fn post_internal(
    client: &reqwest::Client,
    access_token: &str,
    method: &str,
    body: &Value,
) -> Result<Value, AuthError> {
    let url = format!("{CODE_ASSIST_ENDPOINT}/v1internal:{method}");
    let response = client
        .post(&url)
        .bearer_auth(access_token)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::TransientError))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::network(
            format!("{method} failed ({status}): {body}"),
            crate::classify_status(status.as_u16()),
        ));
    }

    response
        .json()
        .await
        .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::UnknownError))
}
