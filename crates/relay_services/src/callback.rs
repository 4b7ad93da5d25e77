use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use relay_domain::{AuthError, AuthorizationCode};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome delivered to a waiter when its redirect arrives
#[derive(Debug)]
pub enum CallbackOutcome {
    Code(AuthorizationCode),
    Error { error: String, description: Option<String> },
}

/// Process-wide receiver for URI-scheme callbacks.
///
/// The host forwards every URI delivered to the process into `handle_uri`;
/// authorization-code flows park a waiter filtered by `state` and get the
/// code (or provider error) back. Waiters are disposed on cancel and
/// timeout, never leaked.
pub struct UriCallbackBridge {
    /// Redirect URI handed to providers that don't fix their own
    redirect_base: String,
    waiters: Mutex<HashMap<String, oneshot::Sender<CallbackOutcome>>>,
}

impl UriCallbackBridge {
    pub fn new(redirect_base: impl Into<String>) -> Self {
        Self { redirect_base: redirect_base.into(), waiters: Mutex::new(HashMap::new()) }
    }

    /// The redirect URI for flows without a provider-fixed one
    pub fn redirect_uri(&self) -> String {
        self.redirect_base.clone()
    }

    /// Feeds a URI delivered by the host. Resolves the waiter whose `state`
    /// matches; URIs with no matching waiter are dropped.
    pub fn handle_uri(&self, uri: &str) {
        let Ok(parsed) = url::Url::parse(uri) else {
            debug!(uri, "ignoring unparseable callback uri");
            return;
        };
        let query: HashMap<String, String> = parsed
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let Some(state) = query.get("state") else {
            debug!(uri, "ignoring callback uri without state");
            return;
        };

        let sender = self.waiters.lock().unwrap().remove(state);
        let Some(sender) = sender else {
            debug!(state, "no waiter registered for callback state");
            return;
        };

        let outcome = match query.get("error") {
            Some(error) => CallbackOutcome::Error {
                error: error.clone(),
                description: query.get("error_description").cloned(),
            },
            None => match query.get("code") {
                Some(code) => CallbackOutcome::Code(code.clone().into()),
                None => CallbackOutcome::Error {
                    error: "invalid_callback".to_string(),
                    description: Some("callback carried neither code nor error".to_string()),
                },
            },
        };
        let _ = sender.send(outcome);
    }

    /// Waits for the callback matching `state`.
    ///
    /// Resolves with the authorization code, the provider's error,
    /// `AuthError::Cancelled` when the host cancels, or
    /// `AuthError::Timeout` when nothing arrives in time. The waiter is
    /// removed on every exit path.
    pub async fn wait_for_callback(
        &self,
        state: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<AuthorizationCode, AuthError> {
        let (sender, receiver) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap()
            .insert(state.to_string(), sender);

        let result = tokio::select! {
            outcome = receiver => match outcome {
                Ok(CallbackOutcome::Code(code)) => Ok(code),
                Ok(CallbackOutcome::Error { error, description }) => {
                    let detail = description.unwrap_or_else(|| error.clone());
                    if error == "access_denied" {
                        Err(AuthError::Denied)
                    } else {
                        Err(AuthError::CompletionFailed(detail))
                    }
                }
                Err(_) => Err(AuthError::Cancelled),
            },
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(AuthError::Timeout(timeout)),
        };

        self.waiters.lock().unwrap().remove(state);
        result
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}
