use serde::{Deserialize, Serialize};

/// Classification of an auth failure, surfaced with status events and kept
/// as the per-provider last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorType {
    /// Permanent credential failure; re-authorization is required
    AuthError,
    /// Network, timeout, 429 or 5xx; retryable
    TransientError,
    UnknownError,
}

impl AuthErrorType {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientError)
    }
}

/// Lifecycle status of an auth-method provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Valid,
    Expired,
    Revoked,
    Error,
}

/// Status transition emitted by an auth-method provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatusEvent {
    pub status: AuthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<AuthErrorType>,
}

impl AuthStatusEvent {
    pub fn valid() -> Self {
        Self { status: AuthStatus::Valid, error: None, error_type: None }
    }

    pub fn revoked() -> Self {
        Self { status: AuthStatus::Revoked, error: None, error_type: None }
    }

    pub fn expired(error: impl Into<String>, error_type: AuthErrorType) -> Self {
        Self {
            status: AuthStatus::Expired,
            error: Some(error.into()),
            error_type: Some(error_type),
        }
    }

    pub fn error(error: impl Into<String>, error_type: AuthErrorType) -> Self {
        Self {
            status: AuthStatus::Error,
            error: Some(error.into()),
            error_type: Some(error_type),
        }
    }
}

/// Last failure recorded for a provider entry.
///
/// Set on `expired`/`error` status, cleared on `valid`/`revoked` and on
/// successful credential resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub error: String,
    pub error_type: AuthErrorType,
}

/// Row shown by the host UI for one provider status view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusViewItem {
    pub label: String,
    pub detail: String,
}

/// Snapshot of a provider's auth state for UI projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: AuthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}
