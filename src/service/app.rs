//! Main application state and service coordination
//!
//! This module contains the production AppState that owns the store, the
//! request handlers, the matchmaker worker, both HTTP servers and the
//! background maintenance tasks.

use crate::api::{ApiServer, ApiServerConfig, ApiState};
use crate::config::AppConfig;
use crate::matchmaking::{
    IntakeConfig, MatchDelivery, MatchIntake, MatchmakerWorker, WorkerConfig, WorkerHandle,
    WorkerStats,
};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::signaling::SignalingRelay;
use crate::store::keys::ACTIVE_QUEUES_KEY;
use crate::store::{EphemeralStore, InMemoryEphemeralStore};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

const TASK_STOP_GRACE: Duration = Duration::from_millis(500);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Point-in-time view of the queues held in the store
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Queue keys in the active-queue registry
    pub active_queues: usize,
    /// Entries across all registered queues
    pub waiting_requests: usize,
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Backing store shared by every component
    store: Arc<InMemoryEphemeralStore>,

    /// Metrics collector shared by every component
    metrics_collector: Arc<MetricsCollector>,

    /// Request handlers
    intake: MatchIntake,
    delivery: MatchDelivery,
    relay: SignalingRelay,

    /// Pairing worker; cloned into the spawned loop on start
    worker: MatchmakerWorker,
    worker_handle: Mutex<Option<WorkerHandle>>,

    /// HTTP servers
    api_server: Arc<ApiServer>,
    health_server: Mutex<Option<Arc<HealthServer>>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing pairhouse matchmaking service");
        info!(
            "Configuration: service={}, api_port={}, metrics_port={}",
            config.service.name, config.service.http_port, config.service.metrics_port
        );

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let store = Arc::new(InMemoryEphemeralStore::new());
        let shared_store: Arc<dyn EphemeralStore> = store.clone();

        let intake = MatchIntake::new(
            shared_store.clone(),
            IntakeConfig {
                bucket_width: config.matchmaking.bucket_width,
                default_target_skill: config.matchmaking.default_target_skill,
            },
            metrics_collector.clone(),
        );
        let delivery = MatchDelivery::new(shared_store.clone(), metrics_collector.clone());
        let relay = SignalingRelay::new(
            shared_store.clone(),
            config.payload_ttl(),
            metrics_collector.clone(),
        );
        let worker = MatchmakerWorker::new(
            shared_store,
            WorkerConfig {
                match_ttl: config.match_ttl(),
                idle_backoff: Duration::from_millis(config.matchmaking.idle_backoff_ms),
                pairing_backoff: Duration::from_millis(config.matchmaking.pairing_backoff_ms),
                error_cooldown: Duration::from_millis(config.matchmaking.error_cooldown_ms),
            },
            metrics_collector.clone(),
        );

        let api_server = Arc::new(ApiServer::new(
            ApiServerConfig {
                port: config.service.http_port,
                host: config.service.http_host.clone(),
            },
            ApiState {
                intake: intake.clone(),
                delivery: delivery.clone(),
                relay: relay.clone(),
                metrics_collector: metrics_collector.clone(),
            },
        ));

        Ok(Self {
            config,
            store,
            metrics_collector,
            intake,
            delivery,
            relay,
            worker,
            worker_handle: Mutex::new(None),
            api_server,
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Bind both HTTP servers, then start the worker and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting pairhouse matchmaking service");

        if self.is_running().await {
            return Err(ServiceError::Initialization {
                message: "Service is already running".to_string(),
            });
        }

        // Bind before flipping the running flag so port conflicts surface here
        let health_server = Arc::new(
            HealthServer::new(
                HealthServerConfig {
                    port: self.config.service.metrics_port,
                    host: self.config.service.http_host.clone(),
                },
                self.metrics_collector.clone(),
            )
            .with_app_state(self.clone()),
        );
        let health_listener =
            health_server
                .bind()
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to bind metrics server: {:#}", e),
                })?;
        let api_listener =
            self.api_server
                .bind()
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to bind API server: {:#}", e),
                })?;

        *self.is_running.write().await = true;

        let mut tasks = self.background_tasks.lock().await;

        let server = health_server.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.serve(health_listener).await {
                error!("Metrics server failed: {}", e);
            }
        }));
        *self.health_server.lock().await = Some(health_server);

        let api_server = self.api_server.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = api_server.serve(api_listener).await {
                error!("API server failed: {}", e);
            }
        }));

        *self.worker_handle.lock().await = Some(self.worker.clone().spawn());
        info!("Matchmaker worker spawned");

        tasks.push(self.spawn_sweep_task());
        tasks.push(self.spawn_health_metrics_task());
        info!("{} background tasks started", tasks.len());
        drop(tasks);

        info!("✅ Pairhouse matchmaking service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of pairhouse service");

        // Mark as not running
        *self.is_running.write().await = false;

        let mut shutdown_error = None;
        if let Some(handle) = self.worker_handle.lock().await.take() {
            match handle.shutdown(self.config.shutdown_timeout()).await {
                Ok(()) => info!("✅ Matchmaker worker stopped"),
                Err(e) => {
                    warn!("Matchmaker worker did not stop cleanly: {}", e);
                    shutdown_error = Some(ServiceError::BackgroundTask {
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.api_server.stop().await {
            warn!("Failed to stop API server: {}", e);
        }
        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop metrics server: {}", e);
            }
        }

        self.stop_background_tasks().await;

        match self.worker.stats() {
            Ok(stats) => info!("Final worker statistics: {:?}", stats),
            Err(e) => warn!("Failed to read final worker statistics: {}", e),
        }
        info!("✅ Pairhouse service shutdown completed");

        match shutdown_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Whether the worker loop is spawned and still alive
    pub async fn is_worker_alive(&self) -> bool {
        match self.worker_handle.lock().await.as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    pub fn store(&self) -> Arc<InMemoryEphemeralStore> {
        self.store.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn intake(&self) -> &MatchIntake {
        &self.intake
    }

    pub fn delivery(&self) -> &MatchDelivery {
        &self.delivery
    }

    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }

    pub fn worker(&self) -> &MatchmakerWorker {
        &self.worker
    }

    pub fn api_server(&self) -> Arc<ApiServer> {
        self.api_server.clone()
    }

    /// Worker running totals
    pub fn worker_stats(&self) -> crate::error::Result<WorkerStats> {
        self.worker.stats()
    }

    /// Time since the state was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Count registered queues and the requests waiting in them
    pub async fn queue_snapshot(&self) -> crate::error::Result<QueueSnapshot> {
        let queues = self.store.smembers(ACTIVE_QUEUES_KEY).await?;
        let mut waiting_requests = 0;
        for queue in &queues {
            waiting_requests += self.store.llen(queue).await?;
        }
        Ok(QueueSnapshot {
            active_queues: queues.len(),
            waiting_requests,
        })
    }

    /// Periodically drop expired keys from the store
    fn spawn_sweep_task(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let metrics_collector = self.metrics_collector.clone();
        let sweep_interval = self.config.sweep_interval();
        let is_running = self.is_running.clone();

        info!(
            "Starting store sweep task ({}s interval)...",
            sweep_interval.as_secs()
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);

            while *is_running.read().await {
                interval.tick().await;

                match store.purge_expired() {
                    Ok(0) => debug!("Sweep completed - no expired keys"),
                    Ok(removed) => {
                        debug!("Swept {} expired keys", removed);
                        metrics_collector.record_keys_swept(removed);
                    }
                    Err(e) => warn!("Store sweep failed: {}", e),
                }
            }

            info!("Store sweep task stopped");
        })
    }

    /// Keep uptime and component health gauges current
    fn spawn_health_metrics_task(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::downgrade(self);
        let is_running = self.is_running.clone();

        info!("Starting health metrics task (15s interval)...");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));

            while *is_running.read().await {
                interval.tick().await;

                let Some(state) = state.upgrade() else {
                    break;
                };
                let collector = state.metrics_collector();
                collector
                    .service()
                    .uptime_seconds
                    .set(state.uptime().as_secs() as i64);

                let store_ok = state.store.key_count().is_ok();
                let worker_ok = state.is_worker_alive().await;
                collector.update_component_health("store", store_ok);
                collector.update_component_health("matchmaker", worker_ok);
                collector.update_health_status(match (store_ok, worker_ok) {
                    (true, true) => 2,
                    (true, false) => 1,
                    _ => 0,
                });

                match state.queue_snapshot().await {
                    Ok(snapshot) => debug!(
                        "Health metrics updated - queues: {}, waiting: {}",
                        snapshot.active_queues, snapshot.waiting_requests
                    ),
                    Err(e) => warn!("Failed to read queue snapshot: {}", e),
                }
            }

            info!("Health metrics task stopped");
        })
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        if task_count == 0 {
            debug!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        // Servers drain on their shutdown signal; periodic tasks sleep on an
        // interval and are aborted once the grace period runs out
        for (i, mut task) in tasks.into_iter().enumerate() {
            if tokio::time::timeout(TASK_STOP_GRACE, &mut task).await.is_err() {
                debug!("Aborting background task {}/{}", i + 1, task_count);
                task.abort();
            }
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubmitMatchRequest;

    fn submission(requester: &str) -> SubmitMatchRequest {
        SubmitMatchRequest {
            requester_id: Some(requester.to_string()),
            game_format: Some("rapid".to_string()),
            target_skill: Some(1200.0),
            skill_deviation: Some(0.0),
            is_rated: false,
        }
    }

    #[tokio::test]
    async fn test_new_state_is_not_running() {
        let state = AppState::new(AppConfig::default()).await.unwrap();

        assert!(!state.is_running().await);
        assert!(!state.is_worker_alive().await);
        assert_eq!(state.config().service.name, "pairhouse");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.matchmaking.bucket_width = 0;

        let result = AppState::new(config).await;
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_queue_snapshot_counts_waiting_requests() {
        let state = AppState::new(AppConfig::default()).await.unwrap();

        state.intake().submit(submission("alice")).await.unwrap();
        state.intake().submit(submission("bob")).await.unwrap();

        let snapshot = state.queue_snapshot().await.unwrap();
        assert_eq!(snapshot.active_queues, 1);
        assert_eq!(snapshot.waiting_requests, 2);

        state.worker().run_cycle().await.unwrap();
        let snapshot = state.queue_snapshot().await.unwrap();
        assert_eq!(snapshot.active_queues, 1);
        assert_eq!(snapshot.waiting_requests, 0);
        assert_eq!(state.worker_stats().unwrap().pairings, 1);
    }
}
