//! Capability traits the sync core depends on.
//!
//! Concrete adapters live in `bankfeed-truelayer` (provider API) and
//! `bankfeed-storage-sqlite` (settings store and record sink).

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use super::sync_model::{
    ClientCredentials, SinkRecord, TokenSet, TransactionRecord, UpstreamAccount,
};
use crate::errors::Result;

/// The remote financial-data provider.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Authorization page the user is sent to during the hand-off.
    fn auth_url(&self, credentials: &ClientCredentials, redirect_url: &str, nonce: &str) -> String;

    /// Exchange an authorization code for a token pair.
    async fn exchange_code_for_token(
        &self,
        credentials: &ClientCredentials,
        redirect_url: &str,
        code: &str,
    ) -> Result<TokenSet>;

    /// Exchange a refresh token for a new token pair.
    async fn refresh_access_token(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenSet>;

    async fn get_accounts(&self, access_token: &str) -> Result<Vec<UpstreamAccount>>;

    /// Current balance of one account, as an opaque record.
    async fn get_balance(&self, access_token: &str, account_id: &str) -> Result<Value>;

    /// Transactions booked between `from` and `to` (inclusive, day granularity).
    async fn get_transactions(
        &self,
        access_token: &str,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TransactionRecord>>;
}

/// Key-value store holding the settings blob.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `None` means nothing has been written under `key` yet.
    async fn read(&self, key: &str) -> Result<Option<Value>>;

    async fn write(&self, key: &str, value: Value) -> Result<()>;
}

/// Append-only time-series store for balance and transaction records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, series: &str, record: Value) -> Result<()>;

    /// Most recently appended record of `series`.
    async fn latest(&self, series: &str) -> Result<Option<SinkRecord>>;
}
