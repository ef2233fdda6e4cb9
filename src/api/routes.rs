use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use super::handlers::{collect_beacon, health_check, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    // Beacons are posted cross-origin from instrumented pages, so the
    // ingestion endpoint must answer preflight requests.
    Router::new()
        .route("/beacon", post(collect_beacon))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
