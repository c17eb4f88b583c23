//! Session token lifecycle: expiry check, refresh and persistence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;

use super::settings::SettingsService;
use super::sync_model::{DriverSettings, TokenSet};
use super::traits::UpstreamApi;
use crate::errors::{Error, Result};

/// Validity of the stored access token at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Valid,
    Expired,
    /// The last refresh attempt was rejected or could not be persisted.
    RefreshFailed,
}

/// Keeps the session authenticated.
///
/// Expiry is computed locally as `refresh time + token_refresh_interval`; the
/// provider's own `expires_in` is stored but not consulted.
pub struct TokenManager {
    upstream: Arc<dyn UpstreamApi>,
    settings: SettingsService,
    token_refresh_interval: chrono::Duration,
    call_timeout: Duration,
}

impl TokenManager {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        settings: SettingsService,
        token_refresh_interval: chrono::Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            upstream,
            settings,
            token_refresh_interval,
            call_timeout,
        }
    }

    /// Token state without performing any I/O.
    pub fn state(settings: &DriverSettings, now: DateTime<Utc>) -> TokenState {
        match &settings.tokens {
            Some(tokens) if !tokens.is_expired(now) => TokenState::Valid,
            _ => TokenState::Expired,
        }
    }

    /// Return a valid token set, refreshing and persisting it first if expired.
    ///
    /// On failure `settings` is left untouched and an [`Error::Auth`] is
    /// returned; the caller must not fetch any data in that case.
    pub async fn ensure_valid(
        &self,
        settings: &mut DriverSettings,
        now: DateTime<Utc>,
    ) -> Result<TokenSet> {
        let tokens = settings.tokens.as_ref().ok_or_else(|| {
            Error::configuration("No tokens stored. Complete the authorization hand-off first.")
        })?;

        if !tokens.is_expired(now) {
            debug!("[TokenManager] Access token valid until {:?}", tokens.expiration_date);
            return Ok(tokens.clone());
        }

        info!(
            "[TokenManager] Access token expired at {:?}, refreshing",
            tokens.expiration_date
        );
        let credentials = settings.credentials();
        let refreshed = match tokio::time::timeout(
            self.call_timeout,
            self.upstream
                .refresh_access_token(&credentials, &tokens.refresh_token),
        )
        .await
        {
            Ok(Ok(refreshed)) => refreshed,
            Ok(Err(err)) => {
                error!("[TokenManager] Token refresh failed: {}", err);
                return Err(into_auth_error(err));
            }
            Err(_) => {
                error!(
                    "[TokenManager] Token refresh timed out after {:?}",
                    self.call_timeout
                );
                return Err(Error::auth(format!(
                    "Token refresh timed out after {:?}",
                    self.call_timeout
                )));
            }
        };

        let mut updated = settings.clone();
        updated.tokens = Some(self.stamp(refreshed, Some(tokens), now));
        // The new token must be durable before any data fetch uses it.
        if let Err(err) = self.settings.save(&updated).await {
            error!("[TokenManager] Refreshed token could not be persisted: {}", err);
            return Err(Error::auth(format!(
                "Refreshed token could not be persisted: {}",
                err
            )));
        }

        *settings = updated;
        let tokens = settings
            .tokens
            .clone()
            .ok_or_else(|| Error::auth("Token set missing after refresh"))?;
        info!(
            "[TokenManager] Token refreshed, next refresh due at {:?}",
            tokens.expiration_date
        );
        Ok(tokens)
    }

    /// Complete the OAuth hand-off: exchange `code` and persist the session.
    pub async fn exchange_code(
        &self,
        settings: &mut DriverSettings,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if code.trim().is_empty() {
            return Err(Error::auth("Authorization code missing"));
        }
        let credentials = settings.credentials();
        if !credentials.is_complete() {
            return Err(Error::configuration("Client id or secret not configured"));
        }

        let tokens = match tokio::time::timeout(
            self.call_timeout,
            self.upstream
                .exchange_code_for_token(&credentials, &settings.redirect_url, code),
        )
        .await
        {
            Ok(result) => result.map_err(into_auth_error)?,
            Err(_) => {
                return Err(Error::auth(format!(
                    "Code exchange timed out after {:?}",
                    self.call_timeout
                )))
            }
        };

        let mut updated = settings.clone();
        updated.tokens = Some(self.stamp(tokens, None, now));
        self.settings.save(&updated).await?;
        *settings = updated;
        info!("[TokenManager] Authorization code exchanged, session stored");
        Ok(())
    }

    fn stamp(&self, mut tokens: TokenSet, previous: Option<&TokenSet>, now: DateTime<Utc>) -> TokenSet {
        // Some providers omit the refresh token when it was not rotated.
        if tokens.refresh_token.is_empty() {
            if let Some(previous) = previous {
                tokens.refresh_token = previous.refresh_token.clone();
            }
        }
        tokens.expiration_date = Some(now + self.token_refresh_interval);
        tokens
    }
}

fn into_auth_error(err: Error) -> Error {
    match err {
        Error::Auth(_) => err,
        other => Error::auth(other.to_string()),
    }
}
