//! Monitoring server
//!
//! Runs next to the public API on its own port and answers orchestrator
//! health checks (`/health`, `/ready`, `/alive`), Prometheus scrapes (`/metrics`) and
//! operators asking how deep the queues are (`/stats`).

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{ComponentCheck, HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "pairhouse";

/// Paths served by the monitoring router, as listed on `/`
const ENDPOINTS: [&str; 5] = ["/health", "/ready", "/alive", "/metrics", "/stats"];

/// Where the monitoring server listens
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Clone)]
struct MonitorState {
    metrics_collector: Arc<MetricsCollector>,
    app_state: Option<Arc<AppState>>,
}

/// HTTP server for health checks, metrics and queue statistics
pub struct HealthServer {
    config: HealthServerConfig,
    state: MonitorState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state: MonitorState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    /// Health checks and `/stats` report 503 until a service is attached
    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid metrics server address")?;
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics server to {}", addr))
    }

    /// Serve until [`HealthServer::stop`] is called
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Metrics server listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        info!("Metrics server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/alive", get(alive))
            .route("/metrics", get(metrics))
            .route("/stats", get(stats))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to metrics server: {}", e);
        }
        Ok(())
    }
}

fn status_code_for(status: &HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "service": SERVICE_NAME,
            "status": HealthStatus::Unhealthy,
            "error": "Service not initialized"
        })),
    )
        .into_response()
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

async fn health(State(state): State<MonitorState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    let status = HealthCheck::liveness_check(app_state)
        .await
        .unwrap_or(HealthStatus::Unhealthy);
    (
        status_code_for(&status),
        Json(json!({
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
        })),
    )
        .into_response()
}

async fn ready(State(state): State<MonitorState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match HealthCheck::readiness_check(app_state).await {
        Ok(status) => {
            debug!("Readiness: {}", status);
            (status_code_for(&status), status.to_string()).into_response()
        }
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response()
        }
    }
}

async fn alive(State(state): State<MonitorState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match HealthCheck::liveness_check(app_state).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive").into_response(),
    }
}

async fn metrics(State(state): State<MonitorState>) -> Response {
    let families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Body of `/stats`
#[derive(Debug, Serialize)]
struct StatsView {
    service: ServiceView,
    queues: QueueView,
    matchmaker: MatchmakerView,
    store: StoreView,
    components: Vec<ComponentCheck>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ServiceView {
    name: &'static str,
    version: &'static str,
    status: HealthStatus,
    uptime: String,
}

#[derive(Debug, Serialize)]
struct QueueView {
    active: usize,
    waiting_requests: usize,
}

#[derive(Debug, Serialize)]
struct MatchmakerView {
    pairings: u64,
    cycles: u64,
    errors: u64,
}

#[derive(Debug, Serialize)]
struct StoreView {
    keys: usize,
}

impl From<HealthCheck> for StatsView {
    fn from(health: HealthCheck) -> Self {
        let stats = health.stats;
        Self {
            service: ServiceView {
                name: SERVICE_NAME,
                version: env!("CARGO_PKG_VERSION"),
                status: health.status,
                uptime: stats.uptime_info,
            },
            queues: QueueView {
                active: stats.active_queues,
                waiting_requests: stats.waiting_requests,
            },
            matchmaker: MatchmakerView {
                pairings: stats.pairings,
                cycles: stats.worker_cycles,
                errors: stats.worker_errors,
            },
            store: StoreView {
                keys: stats.store_keys,
            },
            components: health.checks,
            timestamp: health.timestamp,
        }
    }
}

async fn stats(State(state): State<MonitorState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match HealthCheck::check(app_state).await {
        Ok(health) => Json(StatsView::from(health)).into_response(),
        Err(e) => {
            error!("Failed to collect service stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": SERVICE_NAME,
                    "error": "Failed to collect service stats"
                })),
            )
                .into_response()
        }
    }
}
