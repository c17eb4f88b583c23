//! Scheduler constants and the fixed-cadence tick loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::sync_engine::{SyncEngine, TickOutcome};

/// Cadence at which the scheduler checks whether a cycle is due.
pub const SYNC_TICK_INTERVAL_SECS: u64 = 60;

/// Lifetime assigned to an access token after each refresh or exchange.
pub const TOKEN_REFRESH_INTERVAL_MINUTES: i64 = 30;

/// Bound applied to each upstream call made by the engine.
pub const UPSTREAM_CALL_TIMEOUT_SECS: u64 = 60;

/// Delay between readiness probes at startup.
pub const READINESS_RETRY_BACKOFF_MS: u64 = 1_000;

/// Next due time after a completed cycle.
pub fn next_due_after(now: DateTime<Utc>, refresh_interval_minutes: i64) -> DateTime<Utc> {
    now + chrono::Duration::minutes(refresh_interval_minutes.max(1))
}

/// Drives [`SyncEngine::tick`] at a fixed cadence, regardless of how long a
/// cycle takes. Ticks that fire during a running cycle are skipped.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    tick_interval: Duration,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, tick_interval: Duration) -> Self {
        Self {
            engine,
            tick_interval,
        }
    }

    /// Spawn the tick loop. The first tick fires immediately.
    pub fn start(self) -> JoinHandle<()> {
        info!(
            "[Scheduler] Starting, tick every {}s",
            self.tick_interval.as_secs()
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.engine.tick(Utc::now()).await {
                    TickOutcome::Busy => debug!("[Scheduler] Tick skipped, cycle in flight"),
                    TickOutcome::NotDue { next_due_at } => {
                        debug!("[Scheduler] Not due until {}", next_due_at.to_rfc3339())
                    }
                    TickOutcome::Completed(report) => debug!(
                        "[Scheduler] Cycle complete status={} duration_ms={}",
                        report.status(),
                        report.duration_ms
                    ),
                    // Already logged by the engine; the next due tick retries.
                    TickOutcome::Failed(_) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::sync_engine::SyncConfig;
    use crate::sync::sync_model::DriverSettings;
    use crate::sync::tests::{configured_settings, FakeUpstream, MemorySettingsStore, MemorySink};
    use chrono::TimeZone;

    #[test]
    fn next_due_adds_interval_minutes() {
        let now = Utc.with_ymd_and_hms(2023, 1, 15, 9, 30, 0).single().unwrap();
        assert_eq!(
            next_due_after(now, 45),
            Utc.with_ymd_and_hms(2023, 1, 15, 10, 15, 0).single().unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_immediately_and_only_when_due() {
        let upstream = Arc::new(FakeUpstream::default());
        let settings = configured_settings(Utc::now() + chrono::Duration::days(1));
        let store = Arc::new(MemorySettingsStore::with_value(
            serde_json::to_value(settings).unwrap(),
        ));
        let engine = Arc::new(SyncEngine::new(
            upstream.clone(),
            store,
            Arc::new(MemorySink::default()),
            DriverSettings::default(),
            SyncConfig::default(),
        ));

        let handle = SyncScheduler::new(engine, Duration::from_secs(60)).start();
        // Paused time: let the first tick run, then several more minutes of ticks.
        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        handle.abort();

        // Wall-clock `now` barely moves under paused time, so only the first
        // tick found a cycle due.
        assert_eq!(upstream.balance_requests().len(), 1);
    }
}
