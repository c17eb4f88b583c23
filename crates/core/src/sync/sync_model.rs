//! Sync domain models: settings blob, session tokens, cursor and records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the settings blob lives in the settings store.
pub const SETTINGS_KEY: &str = "settings";

/// Series receiving one balance snapshot per successful cycle.
pub const BALANCE_SERIES: &str = "truelayerUserBalance";

/// Series receiving reconciled transactions in chronological order.
pub const TRANSACTIONS_SERIES: &str = "truelayerUserTransactions";

/// Redirect URL used when nothing has been configured yet.
pub const DEFAULT_REDIRECT_URL: &str = "https://127.0.0.1/driver-truelayer/ui/truelayer-redirect";

/// Data refresh interval applied when the stored one is missing or unusable.
pub const DEFAULT_REFRESH_INTERVAL_MINUTES: i64 = 30;

/// OAuth scopes requested during the hand-off.
pub const PERMISSION_SCOPES: [&str; 4] = ["accounts", "balance", "transactions", "offline_access"];

/// OAuth client credentials registered with the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Access/refresh token pair plus the locally computed expiry.
///
/// Provider fields we do not interpret (`expires_in`, `token_type`, `scope`)
/// are kept in `extra` so the stored blob round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expiration_date: None,
            extra: Map::new(),
        }
    }

    /// A token without a recorded expiry is treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration_date {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

/// The single settings blob persisted in the settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Minutes between data refreshes. Stored as submitted by the
    /// configuration form, so it may be a number or a numeric string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<Value>,
}

fn default_redirect_url() -> String {
    DEFAULT_REDIRECT_URL.to_string()
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: default_redirect_url(),
            tokens: None,
            account_id: None,
            refresh_interval: None,
        }
    }
}

impl DriverSettings {
    /// Defaults used when the store is empty, seeded from process configuration.
    pub fn with_defaults(credentials: ClientCredentials, redirect_url: Option<String>) -> Self {
        Self {
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            redirect_url: redirect_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(default_redirect_url),
            ..Self::default()
        }
    }

    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }

    /// Monitored account, if the hand-off has selected one.
    pub fn monitored_account(&self) -> Option<MonitoredAccount> {
        let account_id = self
            .account_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;
        Some(MonitoredAccount {
            account_id: account_id.to_string(),
            refresh_interval_minutes: self.refresh_interval_minutes(),
        })
    }

    /// Resolved data refresh interval in minutes.
    pub fn refresh_interval_minutes(&self) -> i64 {
        parse_refresh_interval(self.refresh_interval.as_ref())
    }
}

/// Parse a stored refresh interval; anything missing, non-numeric or not
/// positive falls back to [`DEFAULT_REFRESH_INTERVAL_MINUTES`].
pub fn parse_refresh_interval(value: Option<&Value>) -> i64 {
    let minutes = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f as i64)
                })
        }
        _ => None,
    };
    minutes
        .filter(|m| *m > 0)
        .unwrap_or(DEFAULT_REFRESH_INTERVAL_MINUTES)
}

/// The account whose balance and transactions are ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredAccount {
    pub account_id: String,
    pub refresh_interval_minutes: i64,
}

/// Account as listed by the provider during configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamAccount {
    pub account_id: String,
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A transaction as returned by the provider. Only the identity and the
/// timestamp are interpreted; all other fields are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionRecord {
    pub fn new(transaction_id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            timestamp: timestamp.into(),
            extra: Map::new(),
        }
    }

    /// Timestamp as UTC. Accepts RFC 3339, offset-less date-times and bare dates.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_provider_timestamp(&self.timestamp)
    }

    /// Calendar date (UTC) of the transaction.
    pub fn date(&self) -> Option<NaiveDate> {
        self.parsed_timestamp().map(|ts| ts.date_naive())
    }
}

pub(crate) fn parse_provider_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Position of the last durably ingested transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub last_transaction_id: Option<String>,
    pub last_transaction_date: Option<NaiveDate>,
}

impl Cursor {
    pub fn new(id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            last_transaction_id: Some(id.into()),
            last_transaction_date: Some(date),
        }
    }

    /// Cursor positioned on `record`.
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self {
            last_transaction_id: Some(record.transaction_id.clone()),
            last_transaction_date: record.date(),
        }
    }

    /// Move onto a just-persisted record. An unparseable timestamp keeps the
    /// previous date so the fetch window never jumps backwards to the default.
    pub fn advance_to(&mut self, record: &TransactionRecord) {
        self.last_transaction_id = Some(record.transaction_id.clone());
        if let Some(date) = record.date() {
            self.last_transaction_date = Some(date);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_transaction_id.is_none()
    }
}

/// A record read back from the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}
