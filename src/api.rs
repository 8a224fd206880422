//! Health & Status API endpoints
//!
//! - GET /health  - Relayer identity and destination (JSON)
//! - GET /healthz - Liveness probe
//! - GET /metrics - Prometheus metrics
//! - GET /status  - Uptime, guard size, in-flight submissions, journal counts
//! - GET /pending - Journal entries not yet released

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::Address;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::db::{Journal, JournalCounts, JournalEntry};
use crate::guard::ReplayGuard;
use crate::metrics;

const PENDING_LIMIT: i64 = 50;

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub journal: Arc<dyn Journal>,
    pub guard: Arc<ReplayGuard>,
    pub destination: Address,
    pub relayer: Address,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        journal: Arc<dyn Journal>,
        guard: Arc<ReplayGuard>,
        destination: Address,
        relayer: Address,
    ) -> Self {
        Self {
            journal,
            guard,
            destination,
            relayer,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub relayer: String,
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub guard_entries: usize,
    pub in_flight: i64,
    pub journal: JournalCounts,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub releases: Vec<JournalEntry>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        relayer: format!("{}", state.relayer),
        destination: format!("{}", state.destination),
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let journal = match state.journal.counts(state.destination).await {
        Ok(counts) => counts,
        Err(e) => {
            warn!(error = %e, "Failed to read journal counts");
            JournalCounts::default()
        }
    };

    Json(StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        guard_entries: state.guard.len(),
        in_flight: metrics::IN_FLIGHT.get(),
        journal,
    })
}

async fn pending(State(state): State<AppState>) -> Response {
    match state.journal.unreleased(state.destination, PENDING_LIMIT).await {
        Ok(releases) => Json(PendingResponse { releases }).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to read pending releases");
            (StatusCode::SERVICE_UNAVAILABLE, "journal unavailable").into_response()
        }
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/status", get(status))
        .route("/pending", get(pending))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve the API on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> eyre::Result<()> {
    metrics::UP.set(1.0);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Start the API server (combines metrics and status endpoints)
pub async fn start_api_server(addr: SocketAddr, state: AppState) -> eyre::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API server started");
    serve(listener, state).await
}
