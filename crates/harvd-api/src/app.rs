use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Harvest commands
        .route("/harvest", post(handlers::post_harvest).get(handlers::get_harvest))
        .route("/harvest/abort", post(handlers::post_abort))
        .route("/harvest/submit", post(handlers::post_submit))
        .route("/harvest/save", post(handlers::post_save))
        .route("/harvest/etl", get(handlers::get_etls))
        // Status
        .route("/status/health", get(handlers::get_health))
        .route("/status/state", get(handlers::get_state))
        .route("/status/progress", get(handlers::get_progress))
        // Configuration
        .route("/config", get(handlers::get_config).put(handlers::put_config))
        // Schedules
        .route(
            "/schedule",
            get(handlers::get_schedule)
                .post(handlers::post_schedule)
                .delete(handlers::delete_schedule),
        )
        // Service
        .route("/reset", post(handlers::post_reset))
        .route("/events", get(handlers::get_events))
        .route("/log", get(handlers::get_log))
        .route("/version", get(handlers::get_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
