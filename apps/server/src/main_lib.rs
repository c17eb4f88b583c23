use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use bankfeed_core::sync::{
    resolve_host, wait_until_ready, SyncEngine, SyncScheduler, UpstreamApi,
    READINESS_RETRY_BACKOFF_MS,
};
use bankfeed_storage_sqlite::{
    create_pool, init, run_migrations, spawn_writer, SeriesRepository, SettingsRepository,
};
use bankfeed_truelayer::TrueLayerClient;

use crate::config::ServerConfig;

pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub upstream: Arc<dyn UpstreamApi>,
    pub upstream_timeout: Duration,
    upstream_host: Option<String>,
    tick_interval: Duration,
}

/// Open the database, wire the adapters and build the engine.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let db_path = init(&config.data_dir).context("Failed to prepare data directory")?;
    run_migrations(&db_path).context("Failed to run database migrations")?;
    let pool = create_pool(&db_path).context("Failed to create database pool")?;
    let writer = spawn_writer(pool.as_ref().clone());
    info!("Database ready at {}", db_path);

    let client = TrueLayerClient::new(&config.auth_url, &config.api_url)
        .context("Failed to build TrueLayer client")?;
    let upstream_host = client.api_host();
    let upstream: Arc<dyn UpstreamApi> = Arc::new(client);

    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&upstream),
        Arc::new(SettingsRepository::new(Arc::clone(&pool), writer.clone())),
        Arc::new(SeriesRepository::new(pool, writer)),
        config.default_settings(),
        config.sync_config(),
    ));

    Ok(Arc::new(AppState {
        engine,
        upstream,
        upstream_timeout: config.upstream_timeout,
        upstream_host,
        tick_interval: config.tick_interval,
    }))
}

/// Wait for the provider host, seed the cursor, then start the scheduler.
/// Runs in the background so the hand-off pages are served meanwhile.
pub fn start_background_sync(state: &Arc<AppState>) -> JoinHandle<()> {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        match state.upstream_host.as_deref() {
            Some(host) => {
                let backoff = Duration::from_millis(READINESS_RETRY_BACKOFF_MS);
                wait_until_ready(host, backoff, || resolve_host(host)).await;
            }
            None => warn!("Upstream URL has no host, skipping DNS readiness check"),
        }

        let cursor = state.engine.seed_cursor().await;
        info!(
            "Cursor seeded: last_transaction_id={:?} last_transaction_date={:?}",
            cursor.last_transaction_id, cursor.last_transaction_date
        );

        let scheduler = SyncScheduler::new(Arc::clone(&state.engine), state.tick_interval);
        if let Err(err) = scheduler.start().await {
            warn!("Scheduler task ended: {}", err);
        }
    })
}
