//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the pairhouse service:
//! intake, pairing, match delivery and signaling, plus service health.

use crate::matchmaking::worker::PairingOutcome;
use crate::types::{FetchOutcome, SdpType};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the pairing service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Intake and queue metrics
    queue_metrics: QueueMetrics,

    /// Worker and delivery metrics
    pairing_metrics: PairingMetrics,

    /// Signaling relay metrics
    signaling_metrics: SignalingMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Store operations that failed
    pub store_errors_total: IntCounterVec,

    /// Expired keys removed by the sweep task
    pub keys_swept_total: IntCounter,
}

/// Intake and queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Requests appended to a queue, by game format
    pub requests_queued_total: IntCounterVec,

    /// Requests rejected before touching the store, by endpoint
    pub validation_failures_total: IntCounterVec,

    /// Size of the active-queue registry at the last scan
    pub active_queues: IntGauge,

    /// Distribution of sampled skills that were bucketed
    pub skill_sample_distribution: Histogram,
}

/// Worker and delivery metrics
#[derive(Clone)]
pub struct PairingMetrics {
    /// Pairing attempts by outcome
    pub pairings_total: IntCounterVec,

    /// Completed worker cycles
    pub worker_cycles_total: IntCounter,

    /// Worker cycles aborted by an error
    pub worker_errors_total: IntCounter,

    /// Time spent in one worker cycle
    pub cycle_duration: Histogram,

    /// Match polls by outcome (matched/pending)
    pub match_polls_total: IntCounterVec,
}

/// Signaling relay metrics
#[derive(Clone)]
pub struct SignalingMetrics {
    /// Negotiation payloads published, by type
    pub payloads_published_total: IntCounterVec,

    /// Fetch-opposing calls by outcome
    pub fetches_total: IntCounterVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let pairing_metrics = PairingMetrics::new(&registry)?;
        let signaling_metrics = SignalingMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            pairing_metrics,
            signaling_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get pairing metrics
    pub fn pairing(&self) -> &PairingMetrics {
        &self.pairing_metrics
    }

    /// Get signaling metrics
    pub fn signaling(&self) -> &SignalingMetrics {
        &self.signaling_metrics
    }

    /// Record a request landing in a queue
    pub fn record_request_queued(&self, game_format: &str, skill_sample: i64) {
        self.queue_metrics
            .requests_queued_total
            .with_label_values(&[game_format])
            .inc();
        self.queue_metrics
            .skill_sample_distribution
            .observe(skill_sample as f64);
    }

    /// Record a request rejected by validation
    pub fn record_validation_failure(&self, endpoint: &str) {
        self.queue_metrics
            .validation_failures_total
            .with_label_values(&[endpoint])
            .inc();
    }

    /// Record the outcome of one pairing attempt
    pub fn record_pairing_outcome(&self, outcome: &PairingOutcome) {
        self.pairing_metrics
            .pairings_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    /// Record a finished worker cycle
    pub fn record_worker_cycle(&self, registry_size: usize, duration: Duration) {
        self.pairing_metrics.worker_cycles_total.inc();
        self.pairing_metrics
            .cycle_duration
            .observe(duration.as_secs_f64());
        self.queue_metrics.active_queues.set(registry_size as i64);
    }

    /// Record a worker cycle that failed
    pub fn record_worker_error(&self) {
        self.pairing_metrics.worker_errors_total.inc();
    }

    /// Record a match poll
    pub fn record_match_poll(&self, matched: bool) {
        let outcome = if matched { "matched" } else { "pending" };
        self.pairing_metrics
            .match_polls_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a published negotiation payload
    pub fn record_sdp_published(&self, sdp_type: SdpType) {
        let label = match sdp_type {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        };
        self.signaling_metrics
            .payloads_published_total
            .with_label_values(&[label])
            .inc();
    }

    /// Record a fetch-opposing result
    pub fn record_sdp_fetch(&self, outcome: &FetchOutcome) {
        self.signaling_metrics
            .fetches_total
            .with_label_values(&[outcome.status()])
            .inc();
    }

    /// Record a failed store operation
    pub fn record_store_error(&self, operation: &str) {
        self.service_metrics
            .store_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record keys removed by the sweep task
    pub fn record_keys_swept(&self, count: usize) {
        self.service_metrics.keys_swept_total.inc_by(count as u64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("pairhouse_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "pairhouse_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("pairhouse_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let store_errors_total = IntCounterVec::new(
            Opts::new("pairhouse_store_errors_total", "Failed store operations"),
            &["operation"],
        )?;
        registry.register(Box::new(store_errors_total.clone()))?;

        let keys_swept_total = IntCounter::new(
            "pairhouse_keys_swept_total",
            "Expired keys removed by the sweep task",
        )?;
        registry.register(Box::new(keys_swept_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
            store_errors_total,
            keys_swept_total,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_queued_total = IntCounterVec::new(
            Opts::new(
                "pairhouse_requests_queued_total",
                "Match requests appended to a queue",
            ),
            &["game_format"],
        )?;
        registry.register(Box::new(requests_queued_total.clone()))?;

        let validation_failures_total = IntCounterVec::new(
            Opts::new(
                "pairhouse_validation_failures_total",
                "Requests rejected by validation",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(validation_failures_total.clone()))?;

        let active_queues = IntGauge::new(
            "pairhouse_active_queues",
            "Queues in the active-queue registry",
        )?;
        registry.register(Box::new(active_queues.clone()))?;

        let skill_sample_distribution = Histogram::with_opts(
            HistogramOpts::new(
                "pairhouse_skill_sample_distribution",
                "Sampled skill values assigned to buckets",
            )
            .buckets(vec![
                500.0, 800.0, 1000.0, 1200.0, 1400.0, 1600.0, 1800.0, 2000.0, 2500.0,
            ]),
        )?;
        registry.register(Box::new(skill_sample_distribution.clone()))?;

        Ok(Self {
            requests_queued_total,
            validation_failures_total,
            active_queues,
            skill_sample_distribution,
        })
    }
}

impl PairingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairings_total = IntCounterVec::new(
            Opts::new("pairhouse_pairings_total", "Pairing attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(pairings_total.clone()))?;

        let worker_cycles_total =
            IntCounter::new("pairhouse_worker_cycles_total", "Completed worker cycles")?;
        registry.register(Box::new(worker_cycles_total.clone()))?;

        let worker_errors_total = IntCounter::new(
            "pairhouse_worker_errors_total",
            "Worker cycles aborted by an error",
        )?;
        registry.register(Box::new(worker_errors_total.clone()))?;

        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pairhouse_worker_cycle_duration_seconds",
                "Worker cycle duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(cycle_duration.clone()))?;

        let match_polls_total = IntCounterVec::new(
            Opts::new("pairhouse_match_polls_total", "Match polls by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(match_polls_total.clone()))?;

        Ok(Self {
            pairings_total,
            worker_cycles_total,
            worker_errors_total,
            cycle_duration,
            match_polls_total,
        })
    }
}

impl SignalingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let payloads_published_total = IntCounterVec::new(
            Opts::new(
                "pairhouse_sdp_published_total",
                "Negotiation payloads published",
            ),
            &["sdp_type"],
        )?;
        registry.register(Box::new(payloads_published_total.clone()))?;

        let fetches_total = IntCounterVec::new(
            Opts::new(
                "pairhouse_sdp_fetches_total",
                "Fetch-opposing calls by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(fetches_total.clone()))?;

        Ok(Self {
            payloads_published_total,
            fetches_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        // Test that we can access all metric groups
        let _service = collector.service();
        let _queue = collector.queue();
        let _pairing = collector.pairing();
        let _signaling = collector.signaling();
    }

    #[test]
    fn test_pairing_outcomes_are_labelled() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_pairing_outcome(&PairingOutcome::Paired {
            game_id: Uuid::new_v4(),
            first_mover: "alice".to_string(),
            second_mover: "bob".to_string(),
        });
        collector.record_pairing_outcome(&PairingOutcome::SelfMatchDiscarded {
            requester_id: "alice".to_string(),
        });
        collector.record_pairing_outcome(&PairingOutcome::SelfMatchDiscarded {
            requester_id: "carol".to_string(),
        });

        let pairings = &collector.pairing().pairings_total;
        assert_eq!(pairings.with_label_values(&["paired"]).get(), 1);
        assert_eq!(pairings.with_label_values(&["self_match_discarded"]).get(), 2);
    }

    #[test]
    fn test_signaling_and_poll_counters() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_sdp_published(SdpType::Offer);
        collector.record_sdp_fetch(&FetchOutcome::WaitingForOpponent);
        collector.record_match_poll(false);
        collector.record_match_poll(true);

        assert_eq!(
            collector
                .signaling()
                .payloads_published_total
                .with_label_values(&["offer"])
                .get(),
            1
        );
        assert_eq!(
            collector
                .signaling()
                .fetches_total
                .with_label_values(&["waiting_for_opponent"])
                .get(),
            1
        );
        assert_eq!(
            collector
                .pairing()
                .match_polls_total
                .with_label_values(&["pending"])
                .get(),
            1
        );
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.update_health_status(2); // Healthy
        collector.update_component_health("store", true);
        collector.update_component_health("matchmaker", false);

        assert_eq!(collector.service().health_status.get(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.elapsed();

        assert!(duration >= Duration::from_millis(10));

        let final_duration = timer.stop();
        assert!(final_duration >= Duration::from_millis(10));
    }
}
