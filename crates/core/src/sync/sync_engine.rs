//! Sync cycle engine: token check, balance snapshot, transaction reconciliation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use super::balance_sync::BalanceSync;
use super::settings::SettingsService;
use super::sync_model::{Cursor, DriverSettings, TransactionRecord, TRANSACTIONS_SERIES};
use super::sync_scheduler::{
    next_due_after, TOKEN_REFRESH_INTERVAL_MINUTES, UPSTREAM_CALL_TIMEOUT_SECS,
};
use super::token_manager::{TokenManager, TokenState};
use super::traits::{RecordSink, SettingsStore, UpstreamApi};
use super::transaction_reconciler::{ReconcileReport, TransactionReconciler};
use crate::errors::{Error, Result};

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Lifetime assigned to a freshly refreshed access token.
    pub token_refresh_interval: chrono::Duration,
    /// Bound applied to every upstream call made by the engine.
    pub upstream_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            token_refresh_interval: chrono::Duration::minutes(TOKEN_REFRESH_INTERVAL_MINUTES),
            upstream_timeout: Duration::from_secs(UPSTREAM_CALL_TIMEOUT_SECS),
        }
    }
}

/// Mutable engine state. Only ever mutated while the cycle lock is held; a
/// copy is published after every change for status reads.
#[derive(Debug, Clone, Default)]
struct EngineState {
    cursor: Cursor,
    next_due_at: Option<DateTime<Utc>>,
    token_state: Option<TokenState>,
    last_cycle_status: Option<String>,
    last_error: Option<String>,
    last_cycle_at: Option<DateTime<Utc>>,
}

/// Read-only view of the engine for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineStatus {
    pub cycle_running: bool,
    pub last_transaction_id: Option<String>,
    pub last_transaction_date: Option<String>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub token_state: Option<TokenState>,
    pub last_cycle_status: Option<String>,
    pub last_error: Option<String>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Result of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleReport {
    pub account_id: String,
    pub refresh_interval_minutes: i64,
    pub balance_error: Option<String>,
    pub transactions: Option<ReconcileReport>,
    pub transactions_error: Option<String>,
    pub duration_ms: i64,
}

impl SyncCycleReport {
    pub fn status(&self) -> &'static str {
        if self.balance_error.is_none() && self.transactions_error.is_none() {
            "ok"
        } else {
            "partial"
        }
    }
}

/// What a scheduler tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// A previous cycle is still in flight.
    Busy,
    NotDue { next_due_at: DateTime<Utc> },
    Completed(SyncCycleReport),
    /// The cycle failed before finishing; the schedule is unchanged.
    Failed(Error),
}

/// Owns the adapters and the in-memory sync state for one session and one
/// monitored account. At most one cycle runs at a time.
pub struct SyncEngine {
    settings: SettingsService,
    sink: Arc<dyn RecordSink>,
    token_manager: TokenManager,
    balance_sync: BalanceSync,
    reconciler: TransactionReconciler,
    state: Mutex<EngineState>,
    published: std::sync::Mutex<EngineState>,
}

impl SyncEngine {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        settings_store: Arc<dyn SettingsStore>,
        sink: Arc<dyn RecordSink>,
        defaults: DriverSettings,
        config: SyncConfig,
    ) -> Self {
        let settings = SettingsService::new(settings_store, defaults);
        Self {
            token_manager: TokenManager::new(
                Arc::clone(&upstream),
                settings.clone(),
                config.token_refresh_interval,
                config.upstream_timeout,
            ),
            balance_sync: BalanceSync::new(
                Arc::clone(&upstream),
                Arc::clone(&sink),
                config.upstream_timeout,
            ),
            reconciler: TransactionReconciler::new(
                upstream,
                Arc::clone(&sink),
                config.upstream_timeout,
            ),
            settings,
            sink,
            state: Mutex::new(EngineState::default()),
            published: std::sync::Mutex::new(EngineState::default()),
        }
    }

    /// Read-only settings access. Changes go through [`Self::update_settings`].
    pub fn settings(&self) -> &SettingsService {
        &self.settings
    }

    /// Valid access token for callers outside a cycle. Waits for a running
    /// cycle, so the session is refreshed at most once for both.
    pub async fn access_token(&self, now: DateTime<Utc>) -> Result<String> {
        let mut state = self.state.lock().await;
        let mut settings = self.settings.load().await?;
        let result = self.token_manager.ensure_valid(&mut settings, now).await;
        match &result {
            Ok(_) => state.token_state = Some(TokenManager::state(&settings, now)),
            Err(Error::Auth(_)) => state.token_state = Some(TokenState::RefreshFailed),
            Err(_) => {}
        }
        self.publish(&state);
        result.map(|tokens| tokens.access_token)
    }

    /// Exchange an authorization code and store the new session.
    pub async fn exchange_code(&self, code: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut settings = self.settings.load().await?;
        self.token_manager
            .exchange_code(&mut settings, code, now)
            .await?;
        state.token_state = Some(TokenManager::state(&settings, now));
        self.publish(&state);
        Ok(())
    }

    /// Load, modify and save the settings blob without interleaving with a
    /// cycle or another update. Returns the saved settings.
    pub async fn update_settings<F>(&self, change: F) -> Result<DriverSettings>
    where
        F: FnOnce(&mut DriverSettings),
    {
        let _state = self.state.lock().await;
        let mut settings = self.settings.load().await?;
        change(&mut settings);
        self.settings.save(&settings).await?;
        Ok(settings)
    }

    /// Seed the cursor from the most recently stored transaction. Called once
    /// at startup; any failure leaves the cursor empty.
    pub async fn seed_cursor(&self) -> Cursor {
        let cursor = match self.sink.latest(TRANSACTIONS_SERIES).await {
            Ok(Some(latest)) => match serde_json::from_value::<TransactionRecord>(latest.data) {
                Ok(record) => {
                    let cursor = Cursor::from_record(&record);
                    info!(
                        "[Sync] Latest transaction_id: {}, date: {:?} (timestamp: {})",
                        record.transaction_id, cursor.last_transaction_date, record.timestamp
                    );
                    cursor
                }
                Err(err) => {
                    warn!("[Sync] Latest stored transaction is unreadable: {}", err);
                    Cursor::default()
                }
            },
            Ok(None) => {
                info!("[Sync] No previous transactions found");
                Cursor::default()
            }
            Err(err) => {
                warn!("[Sync] Failed to read latest transaction: {}", err);
                Cursor::default()
            }
        };
        let mut state = self.state.lock().await;
        state.cursor = cursor.clone();
        self.publish(&state);
        cursor
    }

    /// Make the next tick run a cycle regardless of the schedule.
    pub async fn reset_schedule(&self) {
        let mut state = self.state.lock().await;
        state.next_due_at = None;
        self.publish(&state);
    }

    fn publish(&self, state: &EngineState) {
        let mut published = self
            .published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *published = state.clone();
    }

    /// Reset the schedule and run a tick in the background.
    pub fn request_cycle(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.reset_schedule().await;
            let outcome = engine.tick(Utc::now()).await;
            debug!("[Sync] Requested cycle finished: {:?}", outcome);
        });
    }

    /// Last published state. Never waits for a running cycle.
    pub fn status(&self) -> SyncEngineStatus {
        let cycle_running = self.state.try_lock().is_err();
        let state = self
            .published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        SyncEngineStatus {
            cycle_running,
            last_transaction_id: state.cursor.last_transaction_id,
            last_transaction_date: state
                .cursor
                .last_transaction_date
                .map(|d| d.format("%Y-%m-%d").to_string()),
            next_due_at: state.next_due_at,
            token_state: state.token_state,
            last_cycle_status: state.last_cycle_status,
            last_error: state.last_error,
            last_cycle_at: state.last_cycle_at,
        }
    }

    /// One scheduler tick: run a cycle if one is due and none is in flight.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let Ok(mut state) = self.state.try_lock() else {
            debug!("[Sync] Previous cycle still running, skipping tick");
            return TickOutcome::Busy;
        };
        if let Some(next_due_at) = state.next_due_at {
            if now < next_due_at {
                return TickOutcome::NotDue { next_due_at };
            }
        }

        info!("[Sync] {} poll", now.to_rfc3339());
        let state = &mut *state;
        let result = self.run_cycle(&mut state.cursor, now).await;
        state.last_cycle_at = Some(now);
        match result {
            Ok(report) => {
                let next_due_at = next_due_after(now, report.refresh_interval_minutes);
                state.next_due_at = Some(next_due_at);
                state.token_state = Some(TokenState::Valid);
                state.last_cycle_status = Some(report.status().to_string());
                state.last_error = report
                    .balance_error
                    .clone()
                    .or_else(|| report.transactions_error.clone());
                info!(
                    "[Sync] Next refresh at {} (refresh_interval = {})",
                    next_due_at.to_rfc3339(),
                    report.refresh_interval_minutes
                );
                self.publish(state);
                TickOutcome::Completed(report)
            }
            Err(err) => {
                error!("[Sync] Cycle failed ({}): {}", err.kind(), err);
                if matches!(err, Error::Auth(_)) {
                    state.token_state = Some(TokenState::RefreshFailed);
                }
                state.last_cycle_status = Some(err.kind().to_string());
                state.last_error = Some(err.to_string());
                self.publish(state);
                TickOutcome::Failed(err)
            }
        }
    }

    /// Run one full cycle against `cursor`. Balance and transaction failures
    /// are reported, not returned; configuration and auth failures abort.
    async fn run_cycle(&self, cursor: &mut Cursor, now: DateTime<Utc>) -> Result<SyncCycleReport> {
        let started_at = Instant::now();
        let mut settings = self.settings.load().await?;

        if !settings.credentials().is_complete() {
            return Err(Error::configuration(
                "Client not created, missing client id or secret",
            ));
        }
        let account = settings.monitored_account().ok_or_else(|| {
            Error::configuration("No account selected. Complete the configuration first.")
        })?;

        let tokens = self.token_manager.ensure_valid(&mut settings, now).await?;

        let balance_error = match self
            .balance_sync
            .run(&tokens.access_token, &account.account_id)
            .await
        {
            Ok(()) => None,
            Err(err) => {
                warn!("[Sync] Error refreshing balance: {}", err);
                Some(err.to_string())
            }
        };

        let (transactions, transactions_error) = match self
            .reconciler
            .run(&tokens.access_token, &account.account_id, cursor, now)
            .await
        {
            Ok(report) => (Some(report), None),
            Err(err) => {
                warn!("[Sync] Error refreshing transactions: {}", err);
                (None, Some(err.to_string()))
            }
        };

        Ok(SyncCycleReport {
            account_id: account.account_id,
            refresh_interval_minutes: account.refresh_interval_minutes,
            balance_error,
            transactions,
            transactions_error,
            duration_ms: started_at.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::{
        configured_settings, FakeUpstream, Journal, MemorySettingsStore, MemorySink,
    };
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 15, 9, 30, 0).single().unwrap()
    }

    struct Harness {
        journal: Journal,
        upstream: Arc<FakeUpstream>,
        store: Arc<MemorySettingsStore>,
        sink: Arc<MemorySink>,
        engine: SyncEngine,
    }

    fn harness(settings: Option<DriverSettings>) -> Harness {
        let journal = Journal::default();
        let upstream = Arc::new(FakeUpstream::with_journal(journal.clone()));
        let store = Arc::new(
            match settings {
                Some(settings) => {
                    MemorySettingsStore::with_value(serde_json::to_value(settings).unwrap())
                }
                None => MemorySettingsStore::default(),
            }
            .with_journal(journal.clone()),
        );
        let sink = Arc::new(MemorySink::default());
        let engine = SyncEngine::new(
            upstream.clone(),
            store.clone(),
            sink.clone(),
            DriverSettings::default(),
            SyncConfig {
                token_refresh_interval: chrono::Duration::minutes(30),
                upstream_timeout: Duration::from_secs(5),
            },
        );
        Harness {
            journal,
            upstream,
            store,
            sink,
            engine,
        }
    }

    fn valid_settings() -> DriverSettings {
        configured_settings(now() + chrono::Duration::minutes(10))
    }

    #[tokio::test]
    async fn first_tick_runs_cycle_and_schedules_next() {
        let h = harness(Some(valid_settings()));
        h.upstream.set_transactions(vec![
            TransactionRecord::new("T1", "2023-01-14T08:00:00+00:00"),
            TransactionRecord::new("T2", "2023-01-15T08:00:00+00:00"),
        ]);

        let outcome = h.engine.tick(now()).await;

        let TickOutcome::Completed(report) = outcome else {
            panic!("expected completed cycle, got {:?}", outcome);
        };
        assert_eq!(report.status(), "ok");
        assert_eq!(report.transactions.unwrap().persisted, 2);
        assert_eq!(h.sink.series(crate::sync::BALANCE_SERIES).len(), 1);

        let status = h.engine.status();
        assert_eq!(status.next_due_at, Some(now() + chrono::Duration::minutes(30)));
        assert_eq!(status.last_transaction_id.as_deref(), Some("T2"));
        assert_eq!(status.token_state, Some(TokenState::Valid));
        assert!(!status.cycle_running);
    }

    #[tokio::test]
    async fn tick_before_due_is_a_no_op() {
        let mut settings = valid_settings();
        settings.refresh_interval = Some(json!("10"));
        let h = harness(Some(settings));

        h.engine.tick(now()).await;
        let outcome = h
            .engine
            .tick(now() + chrono::Duration::minutes(9))
            .await;

        assert!(matches!(outcome, TickOutcome::NotDue { next_due_at } if next_due_at == now() + chrono::Duration::minutes(10)));
        assert_eq!(h.upstream.balance_requests().len(), 1);

        let outcome = h
            .engine
            .tick(now() + chrono::Duration::minutes(10))
            .await;
        assert!(matches!(outcome, TickOutcome::Completed(_)));
        assert_eq!(h.upstream.balance_requests().len(), 2);
    }

    #[tokio::test]
    async fn non_numeric_interval_uses_default() {
        let mut settings = valid_settings();
        settings.refresh_interval = Some(json!("soon"));
        let h = harness(Some(settings));

        h.engine.tick(now()).await;

        assert_eq!(
            h.engine.status().next_due_at,
            Some(now() + chrono::Duration::minutes(30))
        );
    }

    #[tokio::test]
    async fn tick_is_skipped_while_cycle_in_flight() {
        let h = harness(Some(valid_settings()));
        let _guard = h.engine.state.lock().await;

        let outcome = h.engine.tick(now()).await;

        assert!(matches!(outcome, TickOutcome::Busy));
        assert!(h.upstream.balance_requests().is_empty());
    }

    #[tokio::test]
    async fn expired_token_with_failed_refresh_aborts_cycle() {
        let h = harness(Some(configured_settings(now() - chrono::Duration::minutes(1))));
        h.upstream.fail_refresh(true);
        h.upstream
            .set_transactions(vec![TransactionRecord::new("T1", "2023-01-14")]);
        let stored_before = h.store.current();

        let outcome = h.engine.tick(now()).await;

        assert!(matches!(outcome, TickOutcome::Failed(Error::Auth(_))));
        assert!(h.upstream.balance_requests().is_empty());
        assert!(h.upstream.transaction_windows().is_empty());
        assert_eq!(h.store.current(), stored_before);

        let status = h.engine.status();
        assert_eq!(status.next_due_at, None);
        assert_eq!(status.last_transaction_id, None);
        assert_eq!(status.token_state, Some(TokenState::RefreshFailed));

        // Next tick retries from the same expired state.
        h.upstream.fail_refresh(false);
        let outcome = h.engine.tick(now() + chrono::Duration::minutes(1)).await;
        assert!(matches!(outcome, TickOutcome::Completed(_)));
        assert_eq!(h.upstream.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn refreshed_token_is_persisted_before_fetching() {
        let h = harness(Some(configured_settings(now() - chrono::Duration::minutes(1))));

        h.engine.tick(now()).await;

        assert_eq!(
            h.store.current().unwrap()["tokens"]["access_token"],
            "access-1"
        );
        assert_eq!(h.upstream.balance_tokens(), vec!["access-1"]);
        assert_eq!(
            h.journal.entries(),
            vec!["upstream.refresh", "settings.write", "upstream.balance", "upstream.transactions"]
        );
    }

    #[tokio::test]
    async fn balance_failure_does_not_block_transactions() {
        let h = harness(Some(valid_settings()));
        h.upstream.fail_balance(true);
        h.upstream
            .set_transactions(vec![TransactionRecord::new("T1", "2023-01-14")]);

        let outcome = h.engine.tick(now()).await;

        let TickOutcome::Completed(report) = outcome else {
            panic!("expected completed cycle");
        };
        assert_eq!(report.status(), "partial");
        assert!(report.balance_error.is_some());
        assert_eq!(h.sink.transaction_ids(), vec!["T1"]);
        assert!(h.engine.status().next_due_at.is_some());
    }

    #[tokio::test]
    async fn transaction_failure_still_stores_balance() {
        let h = harness(Some(valid_settings()));
        h.upstream.fail_transactions(true);

        let outcome = h.engine.tick(now()).await;

        let TickOutcome::Completed(report) = outcome else {
            panic!("expected completed cycle");
        };
        assert!(report.transactions_error.is_some());
        assert_eq!(h.sink.series(crate::sync::BALANCE_SERIES).len(), 1);
    }

    #[tokio::test]
    async fn missing_configuration_fails_without_io() {
        let h = harness(None);

        let outcome = h.engine.tick(now()).await;

        assert!(matches!(outcome, TickOutcome::Failed(Error::Configuration(_))));
        assert_eq!(h.upstream.refresh_calls(), 0);
        assert!(h.engine.status().next_due_at.is_none());
    }

    #[tokio::test]
    async fn missing_account_is_a_configuration_error() {
        let mut settings = valid_settings();
        settings.account_id = None;
        let h = harness(Some(settings));

        let outcome = h.engine.tick(now()).await;
        assert!(matches!(outcome, TickOutcome::Failed(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn seed_cursor_uses_latest_stored_transaction() {
        let h = harness(Some(valid_settings()));
        h.sink.push(
            TRANSACTIONS_SERIES,
            json!({"transaction_id": "T100", "timestamp": "2023-01-10T12:00:00+00:00"}),
        );

        let cursor = h.engine.seed_cursor().await;

        assert_eq!(
            cursor,
            Cursor::new("T100", NaiveDate::from_ymd_opt(2023, 1, 10).unwrap())
        );
        assert_eq!(
            h.engine.status().last_transaction_date.as_deref(),
            Some("2023-01-10")
        );
    }

    #[tokio::test]
    async fn seed_cursor_tolerates_empty_and_broken_sinks() {
        let h = harness(None);
        assert_eq!(h.engine.seed_cursor().await, Cursor::default());

        h.sink.push(TRANSACTIONS_SERIES, json!({"unexpected": true}));
        assert_eq!(h.engine.seed_cursor().await, Cursor::default());

        h.sink.fail_latest(true);
        assert_eq!(h.engine.seed_cursor().await, Cursor::default());
    }

    #[tokio::test]
    async fn token_request_during_cycle_reuses_the_cycle_refresh() {
        let h = harness(Some(configured_settings(now() - chrono::Duration::minutes(1))));

        let (outcome, token) = tokio::join!(h.engine.tick(now()), h.engine.access_token(now()));

        assert!(matches!(outcome, TickOutcome::Completed(_)));
        assert_eq!(token.unwrap(), "access-1");
        assert_eq!(h.upstream.refresh_calls(), 1);
        assert_eq!(
            h.store.current().unwrap()["tokens"]["access_token"],
            "access-1"
        );
    }

    #[tokio::test]
    async fn tick_during_token_request_is_skipped() {
        let h = harness(Some(configured_settings(now() - chrono::Duration::minutes(1))));

        let (token, outcome) = tokio::join!(h.engine.access_token(now()), h.engine.tick(now()));

        assert_eq!(token.unwrap(), "access-1");
        assert!(matches!(outcome, TickOutcome::Busy));
        assert_eq!(h.upstream.refresh_calls(), 1);
        assert_eq!(h.engine.status().token_state, Some(TokenState::Valid));
    }

    #[tokio::test]
    async fn settings_update_keeps_token_refreshed_by_running_cycle() {
        let h = harness(Some(configured_settings(now() - chrono::Duration::minutes(1))));

        let (outcome, updated) = tokio::join!(
            h.engine.tick(now()),
            h.engine.update_settings(|settings| {
                settings.account_id = Some("acc-9".to_string());
            })
        );

        assert!(matches!(outcome, TickOutcome::Completed(_)));
        assert_eq!(updated.unwrap().account_id.as_deref(), Some("acc-9"));
        let stored = h.store.current().unwrap();
        assert_eq!(stored["tokens"]["access_token"], "access-1");
        assert_eq!(stored["tokens"]["refresh_token"], "refresh-1");
        assert_eq!(stored["account_id"], "acc-9");
    }

    #[tokio::test]
    async fn failed_token_request_marks_refresh_failed() {
        let h = harness(Some(configured_settings(now() - chrono::Duration::minutes(1))));
        h.upstream.fail_refresh(true);

        let err = h.engine.access_token(now()).await.unwrap_err();

        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(h.engine.status().token_state, Some(TokenState::RefreshFailed));
    }

    #[tokio::test]
    async fn exchange_code_stores_session_under_engine_lock() {
        let mut settings = valid_settings();
        settings.tokens = None;
        let h = harness(Some(settings));

        h.engine.exchange_code("abc", now()).await.unwrap();

        assert_eq!(
            h.store.current().unwrap()["tokens"]["access_token"],
            "exchanged-abc"
        );
        assert_eq!(h.engine.status().token_state, Some(TokenState::Valid));
    }

    #[tokio::test]
    async fn reset_schedule_makes_next_tick_due() {
        let h = harness(Some(valid_settings()));
        h.engine.tick(now()).await;
        h.engine.reset_schedule().await;

        let outcome = h.engine.tick(now() + chrono::Duration::minutes(1)).await;
        assert!(matches!(outcome, TickOutcome::Completed(_)));
    }
}
