//! Test fixtures shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use pairhouse::error::{MatchmakingError, Result};
use pairhouse::matchmaking::{IntakeConfig, MatchDelivery, MatchIntake, MatchmakerWorker, WorkerConfig};
use pairhouse::metrics::MetricsCollector;
use pairhouse::peer::PeerConfig;
use pairhouse::signaling::SignalingRelay;
use pairhouse::store::{EphemeralStore, InMemoryEphemeralStore};
use pairhouse::types::SubmitMatchRequest;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store wrapper that fails chosen operations on demand
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryEphemeralStore,
    failing: Mutex<HashSet<&'static str>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail until [`FlakyStore::heal`]
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    pub fn heal(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(operation))
            .unwrap_or(false);
        if failing {
            return Err(MatchmakingError::store_unavailable(operation, "injected fault").into());
        }
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for FlakyStore {
    async fn rpush(&self, key: &str, value: String) -> Result<usize> {
        self.check("rpush")?;
        self.inner.rpush(key, value).await
    }

    async fn lpush(&self, key: &str, value: String) -> Result<usize> {
        self.check("lpush")?;
        self.inner.lpush(key, value).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.check("lpop")?;
        self.inner.lpop(key).await
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.check("llen")?;
        self.inner.llen(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.check("sadd")?;
        self.inner.sadd(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check("smembers")?;
        self.inner.smembers(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check("set_ex")?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check("expire")?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check("ttl")?;
        self.inner.ttl(key).await
    }
}

/// Intake, worker, delivery and relay over one store
pub struct TestPipeline {
    pub store: Arc<dyn EphemeralStore>,
    pub metrics: Arc<MetricsCollector>,
    pub intake: MatchIntake,
    pub worker: MatchmakerWorker,
    pub delivery: MatchDelivery,
    pub relay: SignalingRelay,
}

impl TestPipeline {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        Self {
            intake: MatchIntake::new(store.clone(), IntakeConfig::default(), metrics.clone()),
            worker: MatchmakerWorker::new(store.clone(), test_worker_config(), metrics.clone()),
            delivery: MatchDelivery::new(store.clone(), metrics.clone()),
            relay: SignalingRelay::new(store.clone(), Duration::from_secs(120), metrics.clone()),
            store,
            metrics,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEphemeralStore::new()))
    }
}

pub fn test_worker_config() -> WorkerConfig {
    WorkerConfig {
        match_ttl: Duration::from_secs(30),
        idle_backoff: Duration::from_millis(50),
        pairing_backoff: Duration::from_millis(20),
        error_cooldown: Duration::from_millis(100),
    }
}

/// Request with no deviation, so the bucket is fully determined by `skill`
pub fn submission(requester: &str, game_format: &str, skill: f64) -> SubmitMatchRequest {
    SubmitMatchRequest {
        requester_id: Some(requester.to_string()),
        game_format: Some(game_format.to_string()),
        target_skill: Some(skill),
        skill_deviation: Some(0.0),
        is_rated: false,
    }
}

/// Peer timing short enough for tests on a paused clock
pub fn fast_peer_config() -> PeerConfig {
    PeerConfig {
        ice_gathering_timeout: Duration::from_millis(200),
        signal_poll_interval: Duration::from_millis(100),
        max_signal_polls: 10,
        channel_open_timeout: Duration::from_millis(500),
        reconnect_base_delay: Duration::from_millis(100),
        max_reconnect_attempts: 3,
    }
}

/// A port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to find a free port")
}
