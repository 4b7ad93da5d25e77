use std::collections::HashMap;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use relay_domain::{AuthError, AuthErrorType, OAuth2TokenData, RefreshToken, RetryConfig};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// OAuth error codes that mean the grant itself is dead
const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_grant",
    "invalid_token",
    "access_denied",
    "unauthorized_client",
    "invalid_client",
    "unauthorized",
];

/// Classifies an HTTP status from a token endpoint
pub fn classify_status(status: u16) -> AuthErrorType {
    match status {
        401 | 403 => AuthErrorType::AuthError,
        408 | 429 => AuthErrorType::TransientError,
        500..=599 => AuthErrorType::TransientError,
        _ => AuthErrorType::UnknownError,
    }
}

/// Classifies an OAuth `error` code from a token endpoint body
pub fn classify_oauth_error_code(code: &str) -> AuthErrorType {
    if AUTH_ERROR_CODES.contains(&code) {
        AuthErrorType::AuthError
    } else {
        AuthErrorType::UnknownError
    }
}

/// Token endpoint success body (RFC 6749 §5.1), with vendor extras kept
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub scope: Option<String>,

    /// Vendor-specific fields (Qwen's `resource_url`, id tokens, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    /// Converts to a stored record, keeping `prior_refresh` when the server
    /// omitted a refresh token.
    pub fn into_token_data(self, prior_refresh: Option<&RefreshToken>) -> OAuth2TokenData {
        let mut record = OAuth2TokenData::bearer(self.access_token, self.expires_in);
        if let Some(token_type) = self.token_type {
            record.token_type = token_type;
        }
        record.scope = self.scope;
        record.refresh_token = self
            .refresh_token
            .map(RefreshToken::from)
            .or_else(|| prior_refresh.cloned());
        record
    }

    /// A vendor extra as a string, when present
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|value| value.as_str())
    }
}

/// Device authorization response (RFC 8628 §3.2)
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorizationResponse {
    pub device_code: String,

    pub user_code: String,

    pub verification_uri: String,

    #[serde(default)]
    pub verification_uri_complete: Option<String>,

    pub expires_in: u64,

    /// Minimum seconds between polling attempts; RFC default is 5
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Error body from a token endpoint
#[derive(Debug, Clone, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP client for OAuth token endpoints.
///
/// Form-encoded posts with the OAuth error taxonomy and bounded retry:
/// only transient classifications are retried, auth errors fail fast.
#[derive(Clone)]
pub struct OAuthHttp {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl OAuthHttp {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, retry: RetryConfig::oauth() }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.retry.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_factor(self.retry.backoff_factor)
            .with_max_times(self.retry.max_retry_attempts);
        if self.retry.jitter {
            builder = builder.with_jitter();
        }
        builder
    }

    /// Posts a form to a token endpoint, classifying failures, with bounded
    /// retry on transient errors.
    pub async fn post_token_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &HashMap<String, String>,
    ) -> Result<TokenResponse, AuthError> {
        let attempt = || async { self.post_token_form_once(url, params, headers).await };

        attempt
            .retry(self.backoff())
            .when(|error: &AuthError| error.error_type().is_retryable())
            .notify(|error, delay| {
                debug!(%error, ?delay, "retrying token request");
            })
            .await
    }

    async fn post_token_form_once(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &HashMap<String, String>,
    ) -> Result<TokenResponse, AuthError> {
        let mut request = self
            .client
            .post(url)
            .timeout(Duration::from_millis(self.retry.attempt_timeout_ms))
            .header("Accept", "application/json")
            .form(params);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(Self::classify_reqwest)?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| AuthError::network(error.to_string(), AuthErrorType::TransientError))?;

        if !status.is_success() {
            return Err(Self::classify_error_body(status.as_u16(), &body));
        }

        // Some endpoints return 200 with an error body (GitHub device flow)
        if let Ok(error_body) = serde_json::from_str::<OAuthErrorBody>(&body)
            && !error_body.error.is_empty()
        {
            return Err(AuthError::network(
                error_body
                    .error_description
                    .unwrap_or_else(|| error_body.error.clone()),
                classify_oauth_error_code(&error_body.error),
            ));
        }

        serde_json::from_str(&body).map_err(|error| {
            AuthError::network(
                format!("invalid token response: {error}"),
                AuthErrorType::UnknownError,
            )
        })
    }

    /// Maps a non-2xx token response onto the error taxonomy, preferring
    /// the body's OAuth error code over the HTTP status.
    fn classify_error_body(status: u16, body: &str) -> AuthError {
        match serde_json::from_str::<OAuthErrorBody>(body) {
            Ok(error_body) => {
                let code_type = classify_oauth_error_code(&error_body.error);
                let error_type = if code_type == AuthErrorType::AuthError {
                    AuthErrorType::AuthError
                } else {
                    classify_status(status)
                };
                AuthError::network(
                    format!(
                        "{} ({})",
                        error_body
                            .error_description
                            .unwrap_or_else(|| error_body.error.clone()),
                        error_body.error
                    ),
                    error_type,
                )
            }
            Err(_) => AuthError::network(format!("HTTP {status}: {body}"), classify_status(status)),
        }
    }

    fn classify_reqwest(error: reqwest::Error) -> AuthError {
        // Aborts and timeouts are transient
        let error_type = if error.is_timeout() || error.is_connect() || error.is_request() {
            AuthErrorType::TransientError
        } else {
            AuthErrorType::UnknownError
        };
        AuthError::network(error.to_string(), error_type)
    }

    /// Starts an RFC 8628 device authorization
    pub async fn device_authorization(
        &self,
        url: &str,
        client_id: &str,
        scope: &str,
        headers: &HashMap<String, String>,
    ) -> Result<DeviceAuthorizationResponse, AuthError> {
        let mut params = vec![("client_id", client_id)];
        if !scope.is_empty() {
            params.push(("scope", scope));
        }

        let mut request = self
            .client
            .post(url)
            .timeout(Duration::from_millis(self.retry.attempt_timeout_ms))
            .header("Accept", "application/json")
            .form(&params);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(Self::classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::InitiationFailed(format!(
                "device authorization failed ({status}): {body}"
            )));
        }
        response.json().await.map_err(|error| {
            AuthError::InitiationFailed(format!("invalid device authorization response: {error}"))
        })
    }

    /// Polls a token endpoint until the device grant completes.
    ///
    /// Widens the interval on `slow_down`, aborts on `expired_token` and
    /// `access_denied`, observes the cancellation token at every boundary.
    pub async fn poll_device_token(
        &self,
        token_url: &str,
        client_id: &str,
        device_code: &str,
        interval: u64,
        expires_in: u64,
        headers: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<TokenResponse, AuthError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(expires_in);
        let mut interval = Duration::from_secs(interval.max(1));

        loop {
            if cancel.is_cancelled() {
                return Err(AuthError::Cancelled);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AuthError::Expired);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            }

            let params = [
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", device_code),
                ("client_id", client_id),
            ];

            match self.post_token_form_once(token_url, &params, headers).await {
                Ok(token) => return Ok(token),
                Err(AuthError::Network { message, error_type }) => {
                    if message.contains("authorization_pending") {
                        continue;
                    }
                    if message.contains("slow_down") {
                        // RFC 8628 §3.5: increase the interval by 5 seconds
                        interval += Duration::from_secs(5);
                        continue;
                    }
                    if message.contains("expired_token") {
                        return Err(AuthError::Expired);
                    }
                    if message.contains("access_denied") {
                        return Err(AuthError::Denied);
                    }
                    if error_type == AuthErrorType::TransientError {
                        warn!(message, "transient error while polling device grant");
                        continue;
                    }
                    return Err(AuthError::PollFailed(message));
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Best-effort revocation post (RFC 7009); failures are logged only
    pub async fn revoke_token(&self, url: &str, token: &str, client_id: &str) {
        let params = [("token", token), ("client_id", client_id)];
        let result = self
            .client
            .post(url)
            .timeout(Duration::from_millis(self.retry.attempt_timeout_ms))
            .form(&params)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                debug!(status = %response.status(), "token revocation returned non-success");
            }
            Err(error) => debug!(%error, "token revocation request failed"),
            _ => {}
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use mockito::Server;
    use pretty_assertions::assert_eq;

    use super::*;

    fn no_headers() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(401), AuthErrorType::AuthError);
        assert_eq!(classify_status(403), AuthErrorType::AuthError);
        assert_eq!(classify_status(408), AuthErrorType::TransientError);
        assert_eq!(classify_status(429), AuthErrorType::TransientError);
        assert_eq!(classify_status(503), AuthErrorType::TransientError);
        assert_eq!(classify_status(400), AuthErrorType::UnknownError);
    }

    #[test]
    fn test_oauth_code_classification() {
        assert_eq!(
            classify_oauth_error_code("invalid_grant"),
            AuthErrorType::AuthError
        );
        assert_eq!(
            classify_oauth_error_code("unauthorized_client"),
            AuthErrorType::AuthError
        );
        assert_eq!(
            classify_oauth_error_code("server_error"),
            AuthErrorType::UnknownError
        );
    }

    #[test]
    fn test_token_response_preserves_prior_refresh_token() {
        let response = TokenResponse {
            access_token: "t2".to_string(),
            token_type: Some("Bearer".to_string()),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
            extra: serde_json::Map::new(),
        };
        let prior = RefreshToken::from("r1".to_string());

        let record = response.into_token_data(Some(&prior));
        assert_eq!(record.refresh_token, Some(prior));
    }

    #[tokio::test]
    async fn test_post_token_form_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(
                r#"{
                    "access_token": "t1",
                    "refresh_token": "r1",
                    "expires_in": 3600,
                    "token_type": "Bearer",
                    "resource_url": "portal.example"
                }"#,
            )
            .create_async()
            .await;

        let http = OAuthHttp::new(reqwest::Client::new());
        let url = format!("{}/token", server.url());
        let response = http
            .post_token_form(&url, &[("grant_type", "authorization_code")], &no_headers())
            .await
            .unwrap();

        assert_eq!(response.access_token, "t1");
        assert_eq!(response.refresh_token.as_deref(), Some("r1"));
        assert_eq!(response.extra_str("resource_url"), Some("portal.example"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_grant_is_auth_error_and_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;

        let http = OAuthHttp::new(reqwest::Client::new());
        let url = format!("{}/token", server.url());
        let error = http
            .post_token_form(&url, &[("grant_type", "refresh_token")], &no_headers())
            .await
            .unwrap_err();

        assert_eq!(error.error_type(), AuthErrorType::AuthError);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mut server = Server::new_async().await;
        let success = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"t1","token_type":"Bearer"}"#)
            .create_async()
            .await;
        // Mocks match newest-first; this one stops matching after one hit
        let failure = server
            .mock("POST", "/token")
            .with_status(503)
            .with_body("busy")
            .expect_at_most(1)
            .create_async()
            .await;

        let http = OAuthHttp::new(reqwest::Client::new()).with_retry(RetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
            max_retry_attempts: 3,
            attempt_timeout_ms: 5_000,
            jitter: false,
        });
        let url = format!("{}/token", server.url());
        let response = http
            .post_token_form(&url, &[("grant_type", "client_credentials")], &no_headers())
            .await
            .unwrap();

        assert_eq!(response.access_token, "t1");
        failure.assert_async().await;
        success.assert_async().await;
    }

    #[tokio::test]
    async fn test_ok_body_with_error_field_is_an_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"error":"access_denied"}"#)
            .create_async()
            .await;

        let http = OAuthHttp::new(reqwest::Client::new());
        let url = format!("{}/token", server.url());
        let error = http
            .post_token_form(&url, &[], &no_headers())
            .await
            .unwrap_err();

        assert_eq!(error.error_type(), AuthErrorType::AuthError);
    }
}
