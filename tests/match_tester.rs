//! Match Testing Tool and Test Suite
//!
//! Drives a pairhouse instance over its public HTTP API:
//! - Submitting arbitrary requesters into queues
//! - Polling for match records with a bounded budget
//! - Checking the signaling relay for a game
//! - Automated scenarios that verify both sides see complementary records
//!
//! Run with: `cargo test --test match_tester`
//! Or use the CLI tool: `cargo run --bin match-tester`
#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use pairhouse::types::{
    FetchSdpResponse, GameId, MatchRecord, MatchRequestAck, StatusResponse,
};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";

/// How long to keep polling for a match record
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            attempts: 4,
            interval: Duration::from_secs(2),
        }
    }
}

/// A requester taking part in a scenario
#[derive(Debug, Clone)]
pub struct RequesterSpec {
    pub id: String,
    pub game_format: String,
    pub target_skill: f64,
    pub deviation: f64,
}

impl RequesterSpec {
    pub fn new(id: &str, game_format: &str, target_skill: f64) -> Self {
        Self {
            id: id.to_string(),
            game_format: game_format.to_string(),
            target_skill,
            deviation: 0.0,
        }
    }
}

/// Configuration for a test scenario
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub scenario_name: String,
    pub requesters: Vec<RequesterSpec>,
    pub expected_pairs: usize,
}

/// Result of a scenario run
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario_name: String,
    pub records: HashMap<String, MatchRecord>,
    pub pairs: usize,
    pub consistent: bool,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn passed(&self, expected_pairs: usize) -> bool {
        self.consistent && self.pairs == expected_pairs
    }
}

/// What `GET /get-sdp` answered
#[derive(Debug, Clone)]
pub enum SignalStatus {
    Payload(FetchSdpResponse),
    Pending(StatusResponse),
}

/// HTTP client for a running pairhouse instance
pub struct MatchTester {
    client: reqwest::Client,
    base_url: String,
}

impl MatchTester {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a match request
    pub async fn request_match(&self, spec: &RequesterSpec) -> anyhow::Result<MatchRequestAck> {
        let response = self
            .client
            .post(format!("{}/match-request", self.base_url))
            .json(&json!({
                "requesterId": spec.id,
                "gameFormat": spec.game_format,
                "targetSkill": spec.target_skill,
                "skillDeviation": spec.deviation,
            }))
            .send()
            .await
            .context("Failed to send match request")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Match request rejected ({}): {}", status, body);
        }

        let ack: MatchRequestAck = response.json().await?;
        info!("📥 Queued '{}' into {}", spec.id, ack.queue_key);
        Ok(ack)
    }

    /// One poll; `None` while pending
    pub async fn poll_once(&self, requester_id: &str) -> anyhow::Result<Option<MatchRecord>> {
        let response = self
            .client
            .get(format!("{}/poll-match", self.base_url))
            .query(&[("requesterId", requester_id)])
            .send()
            .await
            .context("Failed to poll for a match")?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::ACCEPTED => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("Poll failed ({}): {}", status, body)
            }
        }
    }

    /// Poll until a record shows up or the budget runs out
    pub async fn poll(
        &self,
        requester_id: &str,
        budget: PollBudget,
    ) -> anyhow::Result<Option<MatchRecord>> {
        for attempt in 1..=budget.attempts {
            if let Some(record) = self.poll_once(requester_id).await? {
                info!(
                    "🎯 '{}' matched against '{}' as {} (game {})",
                    requester_id, record.opponent.requester_id, record.assigned_side, record.game_id
                );
                return Ok(Some(record));
            }
            debug!(
                "No match yet for '{}' ({}/{})",
                requester_id, attempt, budget.attempts
            );
            if attempt < budget.attempts {
                tokio::time::sleep(budget.interval).await;
            }
        }
        Ok(None)
    }

    /// Fetch the opposing payload for a game
    pub async fn signal_status(
        &self,
        game_id: GameId,
        requester_id: &str,
    ) -> anyhow::Result<SignalStatus> {
        let response = self
            .client
            .get(format!("{}/get-sdp", self.base_url))
            .query(&[
                ("gameId", game_id.to_string()),
                ("requesterId", requester_id.to_string()),
            ])
            .send()
            .await
            .context("Failed to query signaling status")?;

        match response.status() {
            StatusCode::OK => Ok(SignalStatus::Payload(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(SignalStatus::Pending(response.json().await?)),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("Signaling status failed ({}): {}", status, body)
            }
        }
    }

    /// Queue every requester, poll each of them and check the records agree
    pub async fn run_scenario(
        &self,
        config: &ScenarioConfig,
        budget: PollBudget,
    ) -> anyhow::Result<ScenarioReport> {
        let start = Instant::now();
        info!("🧪 Running scenario '{}'", config.scenario_name);

        for spec in &config.requesters {
            self.request_match(spec).await?;
        }

        let mut records = HashMap::new();
        for spec in &config.requesters {
            if let Some(record) = self.poll(&spec.id, budget).await? {
                records.insert(spec.id.clone(), record);
            }
        }

        let consistent = records_are_consistent(&records);
        if !consistent {
            warn!(
                "Scenario '{}' produced inconsistent records",
                config.scenario_name
            );
        }

        Ok(ScenarioReport {
            scenario_name: config.scenario_name.clone(),
            pairs: records.len() / 2,
            records,
            consistent,
            elapsed: start.elapsed(),
        })
    }
}

/// Every record must have a counterpart with the same game, the opposite side
/// and the two requester ids crossed.
pub fn records_are_consistent(records: &HashMap<String, MatchRecord>) -> bool {
    records.iter().all(|(requester, record)| {
        records
            .get(&record.opponent.requester_id)
            .map(|other| {
                other.game_id == record.game_id
                    && other.assigned_side == record.assigned_side.opposite()
                    && &other.opponent.requester_id == requester
            })
            .unwrap_or(false)
    })
}

/// Predefined scenarios
pub struct TestScenarios;

impl TestScenarios {
    /// Two requesters with identical skill and no deviation
    pub fn same_skill_pair() -> ScenarioConfig {
        let run = short_run_id();
        ScenarioConfig {
            scenario_name: "same-skill-pair".to_string(),
            requesters: vec![
                RequesterSpec::new(&format!("alice-{}", run), "rapid", 1200.0),
                RequesterSpec::new(&format!("bob-{}", run), "rapid", 1200.0),
            ],
            expected_pairs: 1,
        }
    }

    /// Four requesters in one bucket form two games
    pub fn four_in_bucket() -> ScenarioConfig {
        let run = short_run_id();
        ScenarioConfig {
            scenario_name: "four-in-bucket".to_string(),
            requesters: (1..=4)
                .map(|i| RequesterSpec::new(&format!("player{}-{}", i, run), "blitz", 1510.0))
                .collect(),
            expected_pairs: 2,
        }
    }

    /// Same skill, different formats: nobody is paired
    pub fn format_isolation() -> ScenarioConfig {
        let run = short_run_id();
        ScenarioConfig {
            scenario_name: "format-isolation".to_string(),
            requesters: vec![
                RequesterSpec::new(&format!("carol-{}", run), "rapid", 1800.0),
                RequesterSpec::new(&format!("dave-{}", run), "classical", 1800.0),
            ],
            expected_pairs: 0,
        }
    }

    pub fn by_name(name: &str) -> Option<ScenarioConfig> {
        match name.to_lowercase().as_str() {
            "same-skill-pair" => Some(Self::same_skill_pair()),
            "four-in-bucket" => Some(Self::four_in_bucket()),
            "format-isolation" => Some(Self::format_isolation()),
            _ => None,
        }
    }

    pub fn all() -> Vec<ScenarioConfig> {
        vec![
            Self::same_skill_pair(),
            Self::four_in_bucket(),
            Self::format_isolation(),
        ]
    }
}

/// Suffix that keeps requester ids unique across runs against one instance
fn short_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairhouse::config::AppConfig;
    use pairhouse::service::AppState;
    use pairhouse::types::{SessionDescription, Side};
    use std::sync::Arc;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn start_service() -> (Arc<AppState>, MatchTester) {
        let mut config = AppConfig::default();
        config.service.http_host = "127.0.0.1".to_string();
        config.service.http_port = free_port();
        config.service.metrics_port = free_port();
        config.matchmaking.idle_backoff_ms = 20;
        config.matchmaking.pairing_backoff_ms = 20;
        let base_url = format!("http://127.0.0.1:{}", config.service.http_port);

        let state = Arc::new(AppState::new(config).await.unwrap());
        state.start().await.unwrap();
        (state, MatchTester::new(base_url).unwrap())
    }

    fn fast_budget() -> PollBudget {
        PollBudget {
            attempts: 20,
            interval: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_scenario_same_skill_pair() {
        let (state, tester) = start_service().await;
        let config = TestScenarios::same_skill_pair();

        let report = tester.run_scenario(&config, fast_budget()).await.unwrap();
        assert!(report.passed(config.expected_pairs), "{:?}", report);

        let sides: Vec<Side> = report.records.values().map(|r| r.assigned_side).collect();
        assert!(sides.contains(&Side::White) && sides.contains(&Side::Black));

        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scenario_four_in_bucket() {
        let (state, tester) = start_service().await;
        let config = TestScenarios::four_in_bucket();

        let report = tester.run_scenario(&config, fast_budget()).await.unwrap();
        assert!(report.passed(config.expected_pairs), "{:?}", report);

        let games: std::collections::HashSet<GameId> =
            report.records.values().map(|r| r.game_id).collect();
        assert_eq!(games.len(), 2);

        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scenario_format_isolation() {
        let (state, tester) = start_service().await;
        let config = TestScenarios::format_isolation();
        let budget = PollBudget {
            attempts: 3,
            interval: Duration::from_millis(50),
        };

        let report = tester.run_scenario(&config, budget).await.unwrap();
        assert!(report.passed(0), "{:?}", report);
        assert!(report.records.is_empty());

        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_request_reports_error() {
        let (state, tester) = start_service().await;

        let mut spec = RequesterSpec::new("eve", "", 1200.0);
        spec.game_format = "   ".to_string();
        let err = tester.request_match(&spec).await.unwrap_err();
        assert!(err.to_string().contains("400"));

        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_signal_status_over_http() {
        let (state, tester) = start_service().await;
        let game_id = uuid::Uuid::new_v4();

        match tester.signal_status(game_id, "bob").await.unwrap() {
            SignalStatus::Pending(status) => assert_eq!(status.status, "waiting_for_opponent"),
            other => panic!("unexpected status: {:?}", other),
        }

        state
            .relay()
            .publish(game_id, "alice", SessionDescription::offer("v=0"))
            .await
            .unwrap();

        match tester.signal_status(game_id, "bob").await.unwrap() {
            SignalStatus::Payload(payload) => {
                assert_eq!(payload.opponent, "alice");
                assert_eq!(payload.sdp.sdp, "v=0");
            }
            other => panic!("unexpected status: {:?}", other),
        }

        state.shutdown().await.unwrap();
    }
}
