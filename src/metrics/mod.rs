//! Metrics and monitoring for the pairhouse service
//!
//! Prometheus collectors for every pipeline stage, and the health server that
//! exposes them next to the readiness and liveness probes.

pub mod collector;
pub mod health;

pub use collector::{
    MetricsCollector, MetricsTimer, PairingMetrics, QueueMetrics, ServiceMetrics,
    SignalingMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
