mod status;
mod ui;

use std::sync::Arc;

use axum::Router;

use crate::main_lib::AppState;

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(status::router())
        .merge(ui::router())
        .with_state(state)
}
