//! OAuth hand-off and account selection pages.
//!
//! Flow: `/ui` (credentials form) → `/ui/authenticate` (link to the provider)
//! → `/ui/truelayer-redirect` (code exchange) → `/ui/configure` (account and
//! interval) → `/ui/saveConfiguration`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
    routing::get,
    Router,
};
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use bankfeed_core::sync::{ClientCredentials, UpstreamAccount};

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

const PAGE_HEAD: &str = r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>TrueLayer driver</title></head><body>"#;
const PAGE_TAIL: &str = "</body></html>";

fn page(body: &str) -> Html<String> {
    Html(format!("{}{}{}", PAGE_HEAD, body, PAGE_TAIL))
}

/// Escape text for HTML element content and double-quoted attributes.
pub(crate) fn html_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Random 8-digit nonce for the authorization request.
fn nonce() -> String {
    rand::thread_rng().gen_range(10_000_000..100_000_000).to_string()
}

fn account_options(accounts: &[UpstreamAccount]) -> String {
    accounts
        .iter()
        .map(|account| {
            format!(
                r#"<label><input type="radio" name="account" value="{}"> {} (<i>{}</i>)</label><br><br>"#,
                html_escape(&account.account_id),
                html_escape(&account.display_name),
                html_escape(&account.account_type)
            )
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AuthenticateQuery {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct RedirectQuery {
    code: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveConfigurationQuery {
    #[serde(default)]
    account: String,
    refresh_interval: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn credentials_form(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let settings = state.engine.settings().load().await?;
    Ok(page(&format!(
        r#"<h1>TrueLayer driver</h1>
<form action="/ui/authenticate" method="get">
<label>Client ID <input type="text" name="client_id" value="{}"></label><br>
<label>Client secret <input type="password" name="client_secret" value="{}"></label><br>
<label>Redirect URL <input type="text" name="redirect_url" value="{}"></label><br>
<input type="submit" value="Authenticate">
</form>"#,
        html_escape(&settings.client_id),
        html_escape(&settings.client_secret),
        html_escape(&settings.redirect_url)
    )))
}

async fn authenticate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthenticateQuery>,
) -> ApiResult<Html<String>> {
    let credentials = ClientCredentials {
        client_id: query.client_id.trim().to_string(),
        client_secret: query.client_secret.trim().to_string(),
    };
    if !credentials.is_complete() {
        return Err(ApiError::BadRequest(
            "Client id and client secret are required".to_string(),
        ));
    }
    let redirect_url = query.redirect_url.trim().to_string();
    let settings = state
        .engine
        .update_settings(|settings| {
            settings.client_id = credentials.client_id.clone();
            settings.client_secret = credentials.client_secret.clone();
            if !redirect_url.is_empty() {
                settings.redirect_url = redirect_url;
            }
        })
        .await?;

    let auth_url = state
        .upstream
        .auth_url(&credentials, &settings.redirect_url, &nonce());
    debug!("Authorization URL generated for client {}", credentials.client_id);
    // The provider refuses to render inside a frame, so the link opens a new tab.
    Ok(page(&format!(
        r#"<h1>Connect your bank</h1>
<p><a href="{}" target="_blank" rel="noopener">Log in with TrueLayer</a></p>"#,
        html_escape(&auth_url)
    )))
}

async fn truelayer_redirect(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
) -> ApiResult<Redirect> {
    if let Some(error) = query.error {
        return Err(ApiError::BadRequest(format!(
            "Authorization was not granted: {}",
            error
        )));
    }
    let code = query
        .code
        .ok_or_else(|| ApiError::BadRequest("Authorization code missing".to_string()))?;

    state.engine.exchange_code(&code, Utc::now()).await?;
    info!("Authorization hand-off complete");
    Ok(Redirect::to("/ui/configure"))
}

async fn configure(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let access_token = state.engine.access_token(Utc::now()).await?;
    let accounts = tokio::time::timeout(
        state.upstream_timeout,
        state.upstream.get_accounts(&access_token),
    )
    .await
    .map_err(|_| ApiError::BadRequest("Timed out listing accounts".to_string()))??;
    let settings = state.engine.settings().load().await?;

    Ok(page(&format!(
        r#"<h1>Choose the account to monitor</h1>
<form action="/ui/saveConfiguration" method="get">
{}
<label>Refresh interval (minutes) <input type="number" min="1" name="refresh_interval" value="{}"></label><br>
<input type="submit" value="Save">
</form>"#,
        account_options(&accounts),
        settings.refresh_interval_minutes()
    )))
}

async fn save_configuration(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SaveConfigurationQuery>,
) -> ApiResult<Html<String>> {
    let account = query.account.trim();
    if account.is_empty() {
        return Err(ApiError::BadRequest("No account selected".to_string()));
    }

    let settings = state
        .engine
        .update_settings(|settings| {
            settings.account_id = Some(account.to_string());
            // Stored as submitted; unusable values fall back to the default interval.
            settings.refresh_interval = query.refresh_interval.map(Value::String);
        })
        .await?;
    info!(
        "Configuration saved: account {}, refresh interval {} min",
        account,
        settings.refresh_interval_minutes()
    );

    state.engine.request_cycle();
    Ok(page(
        "<h1>Configuration saved</h1><p>Balance and transactions are being synchronized.</p>",
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ui", get(credentials_form))
        .route("/ui/authenticate", get(authenticate))
        .route("/ui/truelayer-redirect", get(truelayer_redirect))
        .route("/ui/configure", get(configure))
        .route("/ui/saveConfiguration", get(save_configuration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_and_quotes() {
        assert_eq!(
            html_escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn nonce_has_eight_digits() {
        let value = nonce();
        assert_eq!(value.len(), 8);
        assert!(value.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn account_options_render_one_radio_per_account() {
        let accounts = vec![
            UpstreamAccount {
                account_id: "acc-1".to_string(),
                account_type: "TRANSACTION".to_string(),
                display_name: "Current <main>".to_string(),
                extra: Default::default(),
            },
            UpstreamAccount {
                account_id: "acc-2".to_string(),
                account_type: "SAVINGS".to_string(),
                display_name: "Savings".to_string(),
                extra: Default::default(),
            },
        ];
        let html = account_options(&accounts);
        assert_eq!(html.matches(r#"type="radio""#).count(), 2);
        assert!(html.contains(r#"value="acc-2""#));
        assert!(html.contains("Current &lt;main&gt;"));
    }
}
