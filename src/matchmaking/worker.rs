//! Matchmaker worker
//!
//! Scans the active-queue registry, pops the two oldest requests of every queue
//! that has at least two, and writes one match record per requester. The pop
//! sequence is not atomic; a lone popped entry is pushed back to the front so
//! queued requests are delivered at least once. One live worker is assumed.
//!
//! The loop itself is owned by [`WorkerHandle`], which carries the cancellation
//! token and join handle of the spawned task.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::store::keys::{match_key, ACTIVE_QUEUES_KEY};
use crate::store::EphemeralStore;
use crate::types::{GameId, MatchRecord, MatchRequest, Opponent, RequesterId, Side};
use crate::utils::{current_timestamp, generate_game_id};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one queue during a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PairingOutcome {
    /// Two distinct requesters were paired
    Paired {
        game_id: GameId,
        first_mover: RequesterId,
        second_mover: RequesterId,
    },
    /// Both popped entries came from the same requester; both were dropped
    SelfMatchDiscarded { requester_id: RequesterId },
    /// Only one entry could be popped; it went back to the front of the queue
    RaceRecovered { requester_id: Option<RequesterId> },
    /// An entry could not be decoded and was dropped
    MalformedDiscarded { requeued: Option<RequesterId> },
}

impl PairingOutcome {
    /// Metric and log label
    pub fn label(&self) -> &'static str {
        match self {
            PairingOutcome::Paired { .. } => "paired",
            PairingOutcome::SelfMatchDiscarded { .. } => "self_match_discarded",
            PairingOutcome::RaceRecovered { .. } => "race_recovered",
            PairingOutcome::MalformedDiscarded { .. } => "malformed_discarded",
        }
    }
}

/// Summary of a single scan over the registry
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Number of queue keys in the registry
    pub registry_size: usize,
    /// Queues that held fewer than two entries
    pub skipped: usize,
    /// Outcome per queue that was acted on, keyed by queue key
    pub outcomes: Vec<(String, PairingOutcome)>,
    pub duration: Duration,
}

impl CycleReport {
    /// Number of completed pairings in this cycle
    pub fn pairings(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, PairingOutcome::Paired { .. }))
            .count()
    }
}

/// Worker timing configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lifetime of a match record awaiting pickup
    pub match_ttl: Duration,
    /// Sleep when the registry is empty
    pub idle_backoff: Duration,
    /// Sleep after scanning a non-empty registry
    pub pairing_backoff: Duration,
    /// Sleep after a failed cycle
    pub error_cooldown: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            match_ttl: Duration::from_secs(30),
            idle_backoff: Duration::from_millis(1000),
            pairing_backoff: Duration::from_millis(500),
            error_cooldown: Duration::from_millis(5000),
        }
    }
}

/// Running totals kept by the worker
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub cycles: u64,
    pub cycle_errors: u64,
    pub pairings: u64,
    pub self_matches_discarded: u64,
    pub races_recovered: u64,
    pub malformed_discarded: u64,
    /// Registry size seen by the last successful cycle
    pub last_registry_size: usize,
}

/// Pairs requests waiting in the same bucket queue
#[derive(Clone)]
pub struct MatchmakerWorker {
    store: Arc<dyn EphemeralStore>,
    config: WorkerConfig,
    metrics_collector: Arc<MetricsCollector>,
    stats: Arc<RwLock<WorkerStats>>,
}

impl MatchmakerWorker {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        config: WorkerConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            config,
            metrics_collector,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Snapshot of the running totals
    pub fn stats(&self) -> Result<WorkerStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire worker stats lock".to_string(),
            })?;
        Ok(stats.clone())
    }

    /// Scan every registered queue once
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let timer = self.metrics_collector.start_timer();
        let queue_keys = self.store.smembers(ACTIVE_QUEUES_KEY).await.map_err(|e| {
            self.metrics_collector.record_store_error("smembers");
            e
        })?;

        let mut report = CycleReport {
            registry_size: queue_keys.len(),
            ..Default::default()
        };

        for queue_key in queue_keys {
            match self.pair_queue(&queue_key).await? {
                Some(outcome) => {
                    self.metrics_collector.record_pairing_outcome(&outcome);
                    report.outcomes.push((queue_key, outcome));
                }
                None => report.skipped += 1,
            }
        }

        report.duration = timer.stop();
        self.metrics_collector
            .record_worker_cycle(report.registry_size, report.duration);
        self.record_cycle(&report);

        debug!(
            "Worker cycle scanned {} queues ({} skipped, {} paired) in {:?}",
            report.registry_size,
            report.skipped,
            report.pairings(),
            report.duration
        );

        Ok(report)
    }

    /// Try to pair the two oldest requests of one queue.
    /// Returns `None` when the queue holds fewer than two entries.
    pub async fn pair_queue(&self, queue_key: &str) -> Result<Option<PairingOutcome>> {
        let len = self.store.llen(queue_key).await.map_err(|e| {
            self.metrics_collector.record_store_error("llen");
            e
        })?;
        if len < 2 {
            return Ok(None);
        }

        let first = self.pop(queue_key).await?;
        let second = match self.pop(queue_key).await {
            Ok(second) => second,
            Err(e) => {
                if let Some(first) = first {
                    warn!(
                        "Second pop from {} failed, returning the first entry: {}",
                        queue_key, e
                    );
                    self.push_front(queue_key, first).await?;
                }
                return Err(e);
            }
        };

        let (first, second) = match (first, second) {
            (Some(first), Some(second)) => (first, second),
            (Some(lone), None) | (None, Some(lone)) => {
                let requester_id = decode(&lone).map(|r| r.requester_id).ok();
                warn!(
                    "Only one entry could be popped from {}, returning it to the front",
                    queue_key
                );
                self.push_front(queue_key, lone).await?;
                return Ok(Some(PairingOutcome::RaceRecovered { requester_id }));
            }
            (None, None) => {
                warn!("Queue {} drained between length check and pop", queue_key);
                return Ok(None);
            }
        };

        let (first_request, second_request) = match (decode(&first), decode(&second)) {
            (Ok(a), Ok(b)) => (a, b),
            (Ok(valid), Err(e)) => {
                warn!("Dropping malformed entry from {}: {}", queue_key, e);
                let requeued = Some(valid.requester_id.clone());
                self.push_front(queue_key, first).await?;
                return Ok(Some(PairingOutcome::MalformedDiscarded { requeued }));
            }
            (Err(e), Ok(valid)) => {
                warn!("Dropping malformed entry from {}: {}", queue_key, e);
                let requeued = Some(valid.requester_id.clone());
                self.push_front(queue_key, second).await?;
                return Ok(Some(PairingOutcome::MalformedDiscarded { requeued }));
            }
            (Err(e1), Err(e2)) => {
                warn!(
                    "Dropping two malformed entries from {}: {}; {}",
                    queue_key, e1, e2
                );
                return Ok(Some(PairingOutcome::MalformedDiscarded { requeued: None }));
            }
        };

        if first_request.requester_id == second_request.requester_id {
            warn!(
                "Discarding self-match for {} in {}",
                first_request.requester_id, queue_key
            );
            return Ok(Some(PairingOutcome::SelfMatchDiscarded {
                requester_id: first_request.requester_id,
            }));
        }

        let game_id = generate_game_id();
        let first_side = if rand::random::<bool>() {
            Side::White
        } else {
            Side::Black
        };

        if let Err(e) = self
            .write_records(game_id, &first_request, &second_request, first_side)
            .await
        {
            error!(
                "Failed to publish match records for game {}, requeueing both requests: {}",
                game_id, e
            );
            self.push_front(queue_key, second).await?;
            self.push_front(queue_key, first).await?;
            return Err(e);
        }

        let (first_mover, second_mover) = if first_side.is_first_mover() {
            (first_request.requester_id, second_request.requester_id)
        } else {
            (second_request.requester_id, first_request.requester_id)
        };

        info!(
            "Paired {} (white) with {} (black) in game {} from {}",
            first_mover, second_mover, game_id, queue_key
        );

        Ok(Some(PairingOutcome::Paired {
            game_id,
            first_mover,
            second_mover,
        }))
    }

    async fn write_records(
        &self,
        game_id: GameId,
        first: &MatchRequest,
        second: &MatchRequest,
        first_side: Side,
    ) -> Result<()> {
        let created_at = current_timestamp();
        let pairs = [
            (first, second, first_side),
            (second, first, first_side.opposite()),
        ];

        for (own, other, side) in pairs {
            let record = MatchRecord {
                game_id,
                opponent: Opponent {
                    requester_id: other.requester_id.clone(),
                    target_skill: Some(other.target_skill),
                },
                assigned_side: side,
                created_at,
            };
            let serialized = serde_json::to_string(&record).map_err(MatchmakingError::from)?;
            self.store
                .set_ex(&match_key(&own.requester_id), serialized, self.config.match_ttl)
                .await
                .map_err(|e| {
                    self.metrics_collector.record_store_error("set_ex");
                    e
                })?;
        }

        Ok(())
    }

    async fn pop(&self, queue_key: &str) -> Result<Option<String>> {
        self.store.lpop(queue_key).await.map_err(|e| {
            self.metrics_collector.record_store_error("lpop");
            e
        })
    }

    async fn push_front(&self, queue_key: &str, raw: String) -> Result<()> {
        self.store.lpush(queue_key, raw).await.map_err(|e| {
            self.metrics_collector.record_store_error("lpush");
            e
        })?;
        Ok(())
    }

    fn record_cycle(&self, report: &CycleReport) {
        if let Ok(mut stats) = self.stats.write() {
            stats.cycles += 1;
            stats.last_registry_size = report.registry_size;
            for (_, outcome) in &report.outcomes {
                match outcome {
                    PairingOutcome::Paired { .. } => stats.pairings += 1,
                    PairingOutcome::SelfMatchDiscarded { .. } => stats.self_matches_discarded += 1,
                    PairingOutcome::RaceRecovered { .. } => stats.races_recovered += 1,
                    PairingOutcome::MalformedDiscarded { .. } => stats.malformed_discarded += 1,
                }
            }
        }
    }

    fn record_error(&self) {
        self.metrics_collector.record_worker_error();
        if let Ok(mut stats) = self.stats.write() {
            stats.cycle_errors += 1;
        }
    }

    /// Delay before the next scan, given the last result
    pub fn next_delay(&self, result: &Result<CycleReport>) -> Duration {
        match result {
            Ok(report) if report.registry_size == 0 => self.config.idle_backoff,
            Ok(_) => self.config.pairing_backoff,
            Err(_) => self.config.error_cooldown,
        }
    }

    /// Run cycles until `cancel` fires. A failed cycle never ends the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Matchmaker worker started");

        // A started cycle always runs to completion; popped entries must be
        // paired or pushed back before the loop may stop
        while !cancel.is_cancelled() {
            let result = self.run_cycle().await;

            if let Err(e) = &result {
                error!(
                    "Worker cycle failed, cooling down for {:?}: {}",
                    self.config.error_cooldown, e
                );
                self.record_error();
            }

            let delay = self.next_delay(&result);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Matchmaker worker stopped");
    }

    /// Spawn the loop on the runtime
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(task_cancel).await });
        WorkerHandle { cancel, join }
    }
}

/// Owner of a spawned worker loop
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the loop and wait up to `timeout` for it to finish
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, self.join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MatchmakingError::InternalError {
                message: format!("Worker task failed: {}", e),
            }
            .into()),
            Err(_) => Err(MatchmakingError::InternalError {
                message: "Worker did not stop before the shutdown timeout".to_string(),
            }
            .into()),
        }
    }
}

fn decode(raw: &str) -> std::result::Result<MatchRequest, serde_json::Error> {
    serde_json::from_str(raw)
}
