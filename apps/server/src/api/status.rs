//! Liveness and engine status.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use bankfeed_core::sync::SyncEngineStatus;

use crate::main_lib::AppState;

async fn liveness() -> &'static str {
    "active"
}

async fn engine_status(State(state): State<Arc<AppState>>) -> Json<SyncEngineStatus> {
    Json(state.engine.status())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(liveness))
        .route("/status/engine", get(engine_status))
}
