use std::time::Duration;

/// Errors surfaced by request adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Request shape invalid for the vendor; raised before any I/O
    #[error("Request rejected: {0}")]
    SchemaRejection(String),

    /// Non-success HTTP response that exhausted every endpoint and retry
    #[error("Upstream returned {status}: {body}")]
    Http { status: u16, body: String },

    /// The response stream went idle past the configured timeout
    #[error("Response idle for longer than {0:?}")]
    IdleTimeout(Duration),

    /// Request-level cancellation from the host
    #[error("Request cancelled")]
    Cancelled,

    /// The server sent something the adapter cannot parse
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Network(#[from] reqwest::Error),

    /// No credential available for the provider
    #[error("No valid credential for provider {0}")]
    MissingCredential(String),

    /// No adapter registered for the provider's method
    #[error("No request adapter for method {0}")]
    UnsupportedMethod(String),
}

impl AdapterError {
    /// Whether the failed request may be retried on another endpoint
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::IdleTimeout(_) | Self::Network(_) => true,
            _ => false,
        }
    }
}
