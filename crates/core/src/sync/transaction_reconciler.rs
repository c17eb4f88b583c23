//! Incremental transaction ingestion.
//!
//! The provider offers no paging cursor or "since" token, so each run re-reads
//! a sliding date window and diffs it by identity against the last ingested
//! transaction:
//!
//! 1. The window starts at the cursor date (or `now - 30 days`) and ends today.
//! 2. The fetched list is put in chronological order when every entry has a
//!    parseable timestamp; otherwise the provider order is kept. Entries that
//!    share a timestamp keep their relative feed order, read in the feed's
//!    direction. A feed whose first entry is newer than its last, or whose
//!    entries all share one timestamp, is read newest-first (the provider's
//!    native order).
//! 3. The list is scanned from the end for the cursor id. Entries after it are
//!    new. When it is absent the whole list is new.
//! 4. At most [`MAX_TRANSACTIONS`] of the most recent new entries are
//!    persisted, oldest first, and the cursor advances after each success.
//!
//! A failed append is logged and skipped. A later success in the same batch
//! still moves the cursor past it, so the skipped transaction is never
//! retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use super::sync_model::{Cursor, TransactionRecord, TRANSACTIONS_SERIES};
use super::traits::{RecordSink, UpstreamApi};
use crate::errors::{Error, Result};

/// Upper bound on transactions persisted in a single run.
pub const MAX_TRANSACTIONS: usize = 500;

/// Days looked back when there is no cursor date.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    pub fetched: usize,
    /// Whether the cursor transaction was found in the fetched window.
    pub cursor_found: bool,
    /// New entries selected for persistence (after the cap).
    pub new: usize,
    pub persisted: usize,
    pub failed: Vec<String>,
}

pub struct TransactionReconciler {
    upstream: Arc<dyn UpstreamApi>,
    sink: Arc<dyn RecordSink>,
    call_timeout: Duration,
}

impl TransactionReconciler {
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

    /// Fetch window `[start, end]` for the given cursor.
    pub fn window(cursor: &Cursor, now: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
        let end = now.date_naive();
        let start = cursor
            .last_transaction_date
            .unwrap_or_else(|| (now - chrono::Duration::days(DEFAULT_LOOKBACK_DAYS)).date_naive());
        (start, end)
    }

    /// Ingest transactions not yet stored, advancing `cursor` in place after
    /// every successful append. On a fetch failure the cursor is untouched.
    pub async fn run(
        &self,
        access_token: &str,
        account_id: &str,
        cursor: &mut Cursor,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let (start, end) = Self::window(cursor, now);
        info!(
            "[Reconciler] Refreshing transactions from {} to {}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let fetched = tokio::time::timeout(
            self.call_timeout,
            self.upstream
                .get_transactions(access_token, account_id, start, end),
        )
        .await
        .map_err(|_| {
            Error::upstream_fetch(
                "get_transactions",
                format!("timed out after {:?}", self.call_timeout),
            )
        })??;

        let mut report = ReconcileReport {
            window_start: Some(start),
            window_end: Some(end),
            fetched: fetched.len(),
            ..ReconcileReport::default()
        };
        info!(
            "[Reconciler] Got {} transactions since {} (limit = {})",
            fetched.len(),
            start,
            MAX_TRANSACTIONS
        );

        let ordered = chronological(fetched);
        let (new_items, cursor_found) =
            select_new(&ordered, cursor.last_transaction_id.as_deref(), MAX_TRANSACTIONS);
        report.cursor_found = cursor_found;
        report.new = new_items.len();
        if cursor_found {
            debug!(
                "[Reconciler] Found cursor {:?}, {} new transactions",
                cursor.last_transaction_id,
                new_items.len()
            );
        } else {
            debug!(
                "[Reconciler] Cursor {:?} not in window, keeping {} transactions",
                cursor.last_transaction_id,
                new_items.len()
            );
        }

        for record in new_items {
            let value = match serde_json::to_value(record) {
                Ok(value) => value,
                Err(err) => {
                    warn!(
                        "[Reconciler] Could not encode transaction {}: {}",
                        record.transaction_id, err
                    );
                    report.failed.push(record.transaction_id.clone());
                    continue;
                }
            };
            match self.sink.append(TRANSACTIONS_SERIES, value).await {
                Ok(()) => {
                    cursor.advance_to(record);
                    report.persisted += 1;
                }
                Err(err) => {
                    warn!(
                        "[Reconciler] Error saving transaction {}: {}",
                        record.transaction_id, err
                    );
                    report.failed.push(record.transaction_id.clone());
                }
            }
        }

        info!(
            "[Reconciler] Done adding transactions, latest is {:?} on {:?} ({} stored, {} failed)",
            cursor.last_transaction_id,
            cursor.last_transaction_date,
            report.persisted,
            report.failed.len()
        );
        Ok(report)
    }
}

/// Oldest-first order when every entry has a timestamp; provider order
/// otherwise. Ties keep feed order, read in the feed's own direction.
fn chronological(mut records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
    let timestamps: Option<Vec<DateTime<Utc>>> = records
        .iter()
        .map(TransactionRecord::parsed_timestamp)
        .collect();
    let Some(timestamps) = timestamps else {
        return records;
    };
    if let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) {
        if first >= last {
            records.reverse();
        }
    }
    records.sort_by_key(|record| record.parsed_timestamp());
    records
}

/// Entries strictly after the last occurrence of `cursor_id`, capped to the
/// `cap` most recent. Returns whether the cursor was found.
fn select_new<'a>(
    records: &'a [TransactionRecord],
    cursor_id: Option<&str>,
    cap: usize,
) -> (&'a [TransactionRecord], bool) {
    let position = cursor_id.and_then(|id| {
        records
            .iter()
            .rposition(|record| record.transaction_id == id)
    });
    let start = match position {
        Some(p) => p + 1,
        None => 0,
    };
    let new_items = &records[start..];
    let capped_start = new_items.len().saturating_sub(cap);
    (&new_items[capped_start..], position.is_some())
}
