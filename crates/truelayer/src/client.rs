//! TrueLayer API client.
//!
//! Token calls go to the auth host (`/connect/token`, form encoded); account,
//! balance and transaction reads go to the data host (`/data/v1/...`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;

use bankfeed_core::sync::{
    ClientCredentials, TokenSet, TransactionRecord, UpstreamAccount, UpstreamApi,
    PERMISSION_SCOPES,
};

use crate::error::{ApiRetryClass, Result, TrueLayerError};
use crate::types::{ApiErrorResponse, Results, TokenResponse};

/// Production auth host.
pub const DEFAULT_AUTH_URL: &str = "https://auth.truelayer.com";
/// Production data host.
pub const DEFAULT_API_URL: &str = "https://api.truelayer.com";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
const READ_MAX_ATTEMPTS: usize = 3;
const READ_BASE_BACKOFF_MS: u64 = 250;
const READ_MAX_BACKOFF_MS: u64 = 2_000;

fn read_backoff_with_jitter(attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff =
        (READ_BASE_BACKOFF_MS.saturating_mul(1_u64 << exp)).min(READ_MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}

/// Client for the TrueLayer auth and data APIs.
#[derive(Debug, Clone)]
pub struct TrueLayerClient {
    client: reqwest::Client,
    auth_url: String,
    api_url: String,
}

impl TrueLayerClient {
    /// Create a client against the given auth and data hosts
    /// (e.g. [`DEFAULT_AUTH_URL`], [`DEFAULT_API_URL`]).
    pub fn new(auth_url: &str, api_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            auth_url: auth_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Host name of the data API, used for the startup DNS probe.
    pub fn api_host(&self) -> Option<String> {
        reqwest::Url::parse(&self.api_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[TrueLayer] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[TrueLayer] API response error ({}): {}", status, preview);
    }

    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| TrueLayerError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        Ok(headers)
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(TrueLayerError::api(status.as_u16(), error.message()));
            }
            return Err(TrueLayerError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!("[TrueLayer] Failed to deserialize response: {}", e);
            TrueLayerError::unexpected(format!("Failed to parse response: {}", e))
        })
    }

    /// GET a data API path, retrying transient failures with backoff.
    async fn get_results<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<Vec<T>> {
        let url = format!("{}{}", self.api_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self
                .client
                .get(&url)
                .headers(self.headers(token)?)
                .send()
                .await
            {
                Ok(response) => Self::parse_response::<Results<T>>(response).await,
                Err(err) => Err(TrueLayerError::from(err)),
            };

            match result {
                Ok(envelope) => return Ok(envelope.results),
                Err(err)
                    if attempt < READ_MAX_ATTEMPTS
                        && err.retry_class() == ApiRetryClass::Retryable =>
                {
                    let backoff = read_backoff_with_jitter(attempt);
                    warn!(
                        "[TrueLayer] GET {} failed (attempt {}/{}): {}; retrying in {:?}",
                        path, attempt, READ_MAX_ATTEMPTS, err, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let url = format!("{}/connect/token", self.auth_url);
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;
        let tokens: TokenResponse = Self::parse_response(response).await?;
        Ok(tokens.into())
    }

    /// Provider login URL for the hand-off page.
    ///
    /// GET {auth}/?response_type=code&client_id&redirect_uri&scope&nonce&enable_mock=true
    pub fn authorize_url(&self, client_id: &str, redirect_url: &str, nonce: &str) -> String {
        format!(
            "{}/?response_type=code&client_id={}&redirect_uri={}&scope={}&nonce={}&enable_mock=true",
            self.auth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_url),
            urlencoding::encode(&PERMISSION_SCOPES.join(" ")),
            urlencoding::encode(nonce),
        )
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// POST /connect/token (grant_type=authorization_code)
    pub async fn exchange_code(
        &self,
        credentials: &ClientCredentials,
        redirect_url: &str,
        code: &str,
    ) -> Result<TokenSet> {
        self.post_token(&[
            ("grant_type", "authorization_code"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("redirect_uri", redirect_url),
            ("code", code),
        ])
        .await
    }

    /// Obtain a new access token.
    ///
    /// POST /connect/token (grant_type=refresh_token)
    pub async fn refresh(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenSet> {
        self.post_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// GET /data/v1/accounts
    pub async fn accounts(&self, token: &str) -> Result<Vec<UpstreamAccount>> {
        self.get_results(token, "/data/v1/accounts").await
    }

    /// GET /data/v1/accounts/{id}/balance
    ///
    /// The provider returns a one-element list; the first entry is the balance.
    pub async fn balance(&self, token: &str, account_id: &str) -> Result<Value> {
        let path = format!(
            "/data/v1/accounts/{}/balance",
            urlencoding::encode(account_id)
        );
        self.get_results::<Value>(token, &path)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TrueLayerError::unexpected("Balance response contained no results"))
    }

    /// GET /data/v1/accounts/{id}/transactions?from=YYYY-MM-DD&to=YYYY-MM-DD
    pub async fn transactions(
        &self,
        token: &str,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TransactionRecord>> {
        let path = format!(
            "/data/v1/accounts/{}/transactions?from={}&to={}",
            urlencoding::encode(account_id),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        self.get_results(token, &path).await
    }
}

#[async_trait]
impl UpstreamApi for TrueLayerClient {
    fn auth_url(&self, credentials: &ClientCredentials, redirect_url: &str, nonce: &str) -> String {
        self.authorize_url(&credentials.client_id, redirect_url, nonce)
    }

    async fn exchange_code_for_token(
        &self,
        credentials: &ClientCredentials,
        redirect_url: &str,
        code: &str,
    ) -> bankfeed_core::Result<TokenSet> {
        self.exchange_code(credentials, redirect_url, code)
            .await
            .map_err(TrueLayerError::into_auth_error)
    }

    async fn refresh_access_token(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
    ) -> bankfeed_core::Result<TokenSet> {
        self.refresh(credentials, refresh_token)
            .await
            .map_err(TrueLayerError::into_auth_error)
    }

    async fn get_accounts(&self, access_token: &str) -> bankfeed_core::Result<Vec<UpstreamAccount>> {
        self.accounts(access_token)
            .await
            .map_err(|err| err.into_fetch_error("get_accounts"))
    }

    async fn get_balance(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> bankfeed_core::Result<Value> {
        self.balance(access_token, account_id)
            .await
            .map_err(|err| err.into_fetch_error("get_balance"))
    }

    async fn get_transactions(
        &self,
        access_token: &str,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> bankfeed_core::Result<Vec<TransactionRecord>> {
        self.transactions(access_token, account_id, from, to)
            .await
            .map_err(|err| err.into_fetch_error("get_transactions"))
    }
}
