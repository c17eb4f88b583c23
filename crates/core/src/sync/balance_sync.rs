//! Balance snapshot ingestion.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use super::sync_model::BALANCE_SERIES;
use super::traits::{RecordSink, UpstreamApi};
use crate::errors::{Error, Result};

/// Fetches the current balance and appends it as a new snapshot. Every call
/// produces an independent data point; duplicates across cycles are expected.
pub struct BalanceSync {
    upstream: Arc<dyn UpstreamApi>,
    sink: Arc<dyn RecordSink>,
    call_timeout: Duration,
}

impl BalanceSync {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        sink: Arc<dyn RecordSink>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            upstream,
            sink,
            call_timeout,
        }
    }

    pub async fn run(&self, access_token: &str, account_id: &str) -> Result<()> {
        debug!("[BalanceSync] Fetching balance for account {}", account_id);
        let balance = tokio::time::timeout(
            self.call_timeout,
            self.upstream.get_balance(access_token, account_id),
        )
        .await
        .map_err(|_| {
            Error::upstream_fetch(
                "get_balance",
                format!("timed out after {:?}", self.call_timeout),
            )
        })??;

        self.sink
            .append(BALANCE_SERIES, balance)
            .await
            .map_err(|err| Error::persist(BALANCE_SERIES, err.to_string()))?;
        info!("[BalanceSync] Balance snapshot stored for account {}", account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::{FakeUpstream, MemorySink};
    use serde_json::json;

    fn balance_sync(upstream: Arc<FakeUpstream>, sink: Arc<MemorySink>) -> BalanceSync {
        BalanceSync::new(upstream, sink, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn each_run_appends_a_new_snapshot() {
        let upstream = Arc::new(FakeUpstream::default());
        upstream.set_balance(json!({"current": 100.5, "currency": "GBP"}));
        let sink = Arc::new(MemorySink::default());
        let sync = balance_sync(upstream.clone(), sink.clone());

        sync.run("token", "acc-1").await.unwrap();
        sync.run("token", "acc-1").await.unwrap();

        let stored = sink.series(BALANCE_SERIES);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["current"], json!(100.5));
        assert_eq!(upstream.balance_requests(), vec!["acc-1", "acc-1"]);
    }

    #[tokio::test]
    async fn fetch_failure_is_typed_and_stores_nothing() {
        let upstream = Arc::new(FakeUpstream::default());
        upstream.fail_balance(true);
        let sink = Arc::new(MemorySink::default());

        let err = balance_sync(upstream, sink.clone())
            .run("token", "acc-1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpstreamFetch { .. }));
        assert!(sink.series(BALANCE_SERIES).is_empty());
    }

    #[tokio::test]
    async fn append_failure_is_a_persist_error() {
        let upstream = Arc::new(FakeUpstream::default());
        let sink = Arc::new(MemorySink::default());
        sink.fail_series(BALANCE_SERIES);

        let err = balance_sync(upstream, sink)
            .run("token", "acc-1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Persist { .. }));
    }
}
