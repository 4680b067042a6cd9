//! Liveness and readiness probes

use axum::{extract::State, http::StatusCode, Json};
use dealmemo_common::config::StoreBackend;
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub store: StoreProbe,
}

#[derive(Serialize)]
pub struct StoreProbe {
    pub backend: StoreBackend,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: dealmemo_common::VERSION,
    })
}

/// 503 until the status store answers a ping
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let started = Instant::now();
    let ping = state.memos.ping().await;

    let store = StoreProbe {
        backend: state.config.store.backend,
        reachable: ping.is_ok(),
        latency_ms: ping.is_ok().then(|| started.elapsed().as_millis() as u64),
        error: ping.err().map(|e| e.to_string()),
    };

    if store.reachable {
        (StatusCode::OK, Json(ReadyResponse { status: "ready", store }))
    } else {
        tracing::warn!(error = ?store.error, "Readiness check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse { status: "not_ready", store }),
        )
    }
}
