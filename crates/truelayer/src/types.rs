//! Wire types for the TrueLayer auth and data APIs.

use bankfeed_core::sync::TokenSet;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Data API envelope: every read wraps its payload in `results`.
#[derive(Debug, Deserialize)]
pub struct Results<T> {
    pub results: Vec<T>,
}

/// Body of `POST /connect/token`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Omitted by the provider when the refresh token was not rotated.
    #[serde(default)]
    pub refresh_token: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<TokenResponse> for TokenSet {
    fn from(response: TokenResponse) -> Self {
        let mut tokens = TokenSet::new(response.access_token, response.refresh_token);
        tokens.extra = response.extra;
        tokens
    }
}

/// Error body shared by both APIs.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ApiErrorResponse {
    pub fn message(&self) -> String {
        match &self.error_description {
            Some(description) if !description.is_empty() => {
                format!("{}: {}", self.error, description)
            }
            _ => self.error.clone(),
        }
    }
}
