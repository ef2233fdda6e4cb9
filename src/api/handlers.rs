use axum::{
    extract::{ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::analytics::beacon::Beacon;
use crate::analytics::ip::extract_client_ip;
use crate::analytics::Ingestor;
use crate::config::IngestConfig;

pub struct AppState {
    pub ingestor: Ingestor,
    pub ingest_config: IngestConfig,
}

/// Ingest a single beacon.
///
/// Beacons are fire-and-forget: clients never await an outcome, so this
/// always answers 202 with an empty body. Failures are logged and the
/// beacon is dropped.
pub async fn collect_beacon(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(beacon): Json<Beacon>,
) -> StatusCode {
    let client_ip = extract_client_ip(&headers, addr.ip(), &state.ingest_config).to_string();
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());

    match state
        .ingestor
        .ingest(beacon, Some(client_ip.as_str()), user_agent)
        .await
    {
        Ok(outcome) => {
            tracing::debug!(?outcome, "beacon processed");
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to record beacon, dropping");
        }
    }

    StatusCode::ACCEPTED
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
