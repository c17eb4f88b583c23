//! Error types for the TrueLayer client.

use bankfeed_core::Error as CoreError;
use thiserror::Error;

/// Result type alias for TrueLayer client operations.
pub type Result<T> = std::result::Result<T, TrueLayerError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur while talking to the provider.
#[derive(Debug, Error)]
pub enum TrueLayerError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the auth or data API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A 2xx response whose body did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Authentication error (missing or malformed token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl TrueLayerError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an unexpected response error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(err) if err.is_timeout() || err.is_connect() => ApiRetryClass::Retryable,
            Self::Http(_) => ApiRetryClass::Permanent,
            Self::Json(_) | Self::UnexpectedResponse(_) => ApiRetryClass::Permanent,
            Self::Auth(_) => ApiRetryClass::ReauthRequired,
        }
    }

    /// Map a token endpoint failure into the core taxonomy.
    pub fn into_auth_error(self) -> CoreError {
        CoreError::auth(format!("{} [{:?}]", self, self.retry_class()))
    }

    /// Map a data read failure into the core taxonomy.
    pub fn into_fetch_error(self, operation: &'static str) -> CoreError {
        CoreError::upstream_fetch(operation, format!("{} [{:?}]", self, self.retry_class()))
    }
}
