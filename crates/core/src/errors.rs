//! Error types for the sync core.

use thiserror::Error;

/// Result type alias for sync core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a sync cycle.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials, tokens or monitored account are missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Token exchange or refresh failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Balance, account or transaction read failed.
    #[error("Upstream fetch failed ({operation}): {message}")]
    UpstreamFetch {
        operation: &'static str,
        message: String,
    },

    /// Appending a record to the sink failed.
    #[error("Persist failed ({series}): {message}")]
    Persist { series: String, message: String },

    /// The upstream host could not be resolved at startup.
    #[error("Readiness check failed: {0}")]
    Readiness(String),

    /// Settings or sink backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create an upstream fetch error
    pub fn upstream_fetch(operation: &'static str, message: impl Into<String>) -> Self {
        Self::UpstreamFetch {
            operation,
            message: message.into(),
        }
    }

    /// Create a persist error
    pub fn persist(series: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persist {
            series: series.into(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Short machine-readable label used in cycle reports and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config_error",
            Self::Auth(_) => "auth_error",
            Self::UpstreamFetch { .. } => "fetch_error",
            Self::Persist { .. } => "persist_error",
            Self::Readiness(_) => "readiness_error",
            Self::Storage(_) => "storage_error",
            Self::Json(_) => "json_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_fetch_error_names_operation() {
        let err = Error::upstream_fetch("get_balance", "HTTP 503");
        assert_eq!(
            err.to_string(),
            "Upstream fetch failed (get_balance): HTTP 503"
        );
        assert_eq!(err.kind(), "fetch_error");
    }

    #[test]
    fn json_errors_convert() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), "json_error");
    }
}
