//! Health check functionality
//!
//! Readiness and liveness probes plus a detailed component report for the
//! pairhouse service.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

impl HealthStatus {
    /// Combine with a component status; the worse of the two wins
    fn merge(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Queue keys in the active-queue registry
    pub active_queues: usize,
    /// Requests waiting across all queues
    pub waiting_requests: usize,
    /// Pairings completed since service start
    pub pairings: u64,
    /// Worker cycles completed and failed
    pub worker_cycles: u64,
    pub worker_errors: u64,
    /// Live keys in the store, expired ones included until swept
    pub store_keys: usize,
    /// Service uptime information
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_store(&app_state).await,
            Self::check_matchmaker(&app_state).await,
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |overall, check| {
                overall.merge(&check.status)
            });

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the store must answer and the worker must be alive
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let store = Self::check_store(&app_state).await;
        let matchmaker = Self::check_matchmaker(&app_state).await;
        Ok(store.status.merge(&matchmaker.status))
    }

    /// Check if service is running
    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Check that the store answers
    async fn check_store(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.store().key_count() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Store health check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Store unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Check the worker loop; a dead worker leaves requests queued forever
    async fn check_matchmaker(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_worker_alive().await {
            match app_state.worker_stats() {
                Ok(stats) if stats.cycles == 0 && stats.cycle_errors > 0 => (
                    HealthStatus::Degraded,
                    Some(format!("{} failed cycles, none completed", stats.cycle_errors)),
                ),
                Ok(_) => (HealthStatus::Healthy, None),
                Err(e) => (
                    HealthStatus::Degraded,
                    Some(format!("Stats check failed: {}", e)),
                ),
            }
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Matchmaker worker is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "matchmaker".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Gather current service statistics
    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let mut stats = ServiceStats {
            uptime_info: format!("Up {}s", app_state.uptime().as_secs()),
            ..ServiceStats::default()
        };

        match app_state.queue_snapshot().await {
            Ok(snapshot) => {
                stats.active_queues = snapshot.active_queues;
                stats.waiting_requests = snapshot.waiting_requests;
            }
            Err(e) => debug!("Failed to read queue snapshot for health check: {}", e),
        }

        match app_state.worker_stats() {
            Ok(worker) => {
                stats.pairings = worker.pairings;
                stats.worker_cycles = worker.cycles;
                stats.worker_errors = worker.cycle_errors;
            }
            Err(e) => debug!("Failed to read worker stats for health check: {}", e),
        }

        if let Ok(keys) = app_state.store().key_count() {
            stats.store_keys = keys;
        }

        stats
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
