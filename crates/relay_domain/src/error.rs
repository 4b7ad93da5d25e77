use std::time::Duration;

use crate::AuthErrorType;

/// Errors surfaced by the credential lifecycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// Invalid or missing auth config for a requested provider.
    #[error("Invalid auth configuration: {0}")]
    Config(String),

    /// Authentication initiation failed.
    #[error("Authentication initiation failed: {0}")]
    InitiationFailed(String),

    /// Authentication timed out waiting for user.
    #[error("Authentication timed out after {0:?}")]
    Timeout(Duration),

    /// Device code or authorization session expired before completion.
    #[error("Device code or session expired")]
    Expired,

    /// User denied authorization request.
    #[error("User denied authorization")]
    Denied,

    /// User cancelled the flow from the host UI.
    #[error("Authorization cancelled")]
    Cancelled,

    /// Polling operation failed due to network or server error.
    #[error("Polling failed: {0}")]
    PollFailed(String),

    /// Authentication completion failed.
    #[error("Authentication completion failed: {0}")]
    CompletionFailed(String),

    /// Token refresh operation failed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// A secret reference did not resolve in the store.
    #[error("Missing secret for reference: {0}")]
    MissingSecret(String),

    /// Classified network failure from a token endpoint.
    #[error("{message}")]
    Network { message: String, error_type: AuthErrorType },
}

impl AuthError {
    /// Maps the error onto the three-way taxonomy kept as last-error state.
    pub fn error_type(&self) -> AuthErrorType {
        match self {
            Self::Network { error_type, .. } => *error_type,
            Self::Expired | Self::Denied => AuthErrorType::AuthError,
            Self::Timeout(_) | Self::PollFailed(_) => AuthErrorType::TransientError,
            Self::Config(_)
            | Self::InitiationFailed(_)
            | Self::Cancelled
            | Self::CompletionFailed(_)
            | Self::RefreshFailed(_)
            | Self::MissingSecret(_) => AuthErrorType::UnknownError,
        }
    }

    pub fn network(message: impl Into<String>, error_type: AuthErrorType) -> Self {
        Self::Network { message: message.into(), error_type }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_error_display() {
        let error = AuthError::InitiationFailed("network down".to_string());
        assert_eq!(
            error.to_string(),
            "Authentication initiation failed: network down"
        );

        let error = AuthError::Timeout(Duration::from_secs(300));
        assert_eq!(error.to_string(), "Authentication timed out after 300s");

        let error = AuthError::MissingSecret("secret://api-key/x".to_string());
        assert_eq!(
            error.to_string(),
            "Missing secret for reference: secret://api-key/x"
        );
    }

    #[test]
    fn test_classification() {
        assert_eq!(AuthError::Denied.error_type(), AuthErrorType::AuthError);
        assert_eq!(
            AuthError::PollFailed("x".into()).error_type(),
            AuthErrorType::TransientError
        );
        assert_eq!(
            AuthError::network("401", AuthErrorType::AuthError).error_type(),
            AuthErrorType::AuthError
        );
    }
}
