//! Signaling relay
//!
//! Peers publish their session description under `sdp:{gameId}:{requesterId}`
//! and join the game's presence set. Both keys share one TTL that is refreshed
//! on every publish, so presence never outlives the payloads it points at.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::store::keys::{presence_key, sdp_key};
use crate::store::EphemeralStore;
use crate::types::{FetchOutcome, GameId, SessionDescription, SignalingPayload};
use crate::utils::{current_timestamp, non_empty};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Lifetime of payloads and presence sets when none is configured
pub const DEFAULT_PAYLOAD_TTL: Duration = Duration::from_secs(120);

/// Stores and hands out negotiation payloads for paired peers
#[derive(Clone)]
pub struct SignalingRelay {
    store: Arc<dyn EphemeralStore>,
    payload_ttl: Duration,
    metrics_collector: Arc<MetricsCollector>,
}

impl SignalingRelay {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        payload_ttl: Duration,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            payload_ttl,
            metrics_collector,
        }
    }

    pub fn payload_ttl(&self) -> Duration {
        self.payload_ttl
    }

    /// Store the caller's description and refresh the game's presence set
    pub async fn publish(
        &self,
        game_id: GameId,
        requester_id: &str,
        description: SessionDescription,
    ) -> Result<()> {
        let requester_id = self.require_requester(requester_id, "send-sdp")?;
        let sdp_type = description.sdp_type;

        let payload = SignalingPayload {
            game_id,
            requester_id: requester_id.to_string(),
            session_description: description,
            published_at: current_timestamp(),
        };
        let serialized = serde_json::to_string(&payload).map_err(MatchmakingError::from)?;

        self.store
            .set_ex(&sdp_key(&game_id, requester_id), serialized, self.payload_ttl)
            .await
            .map_err(|e| self.store_fault("set_ex", e))?;

        let presence = presence_key(&game_id);
        self.store
            .sadd(&presence, requester_id)
            .await
            .map_err(|e| self.store_fault("sadd", e))?;
        self.store
            .expire(&presence, self.payload_ttl)
            .await
            .map_err(|e| self.store_fault("expire", e))?;

        self.metrics_collector.record_sdp_published(sdp_type);
        info!(
            "Stored {} from {} for game {}",
            sdp_type, requester_id, game_id
        );

        Ok(())
    }

    /// Fetch the payload of whoever else is present in the game
    pub async fn fetch_opposing(&self, game_id: GameId, requester_id: &str) -> Result<FetchOutcome> {
        let requester_id = self.require_requester(requester_id, "get-sdp")?;

        let members = self
            .store
            .smembers(&presence_key(&game_id))
            .await
            .map_err(|e| self.store_fault("smembers", e))?;

        // Games are two-party: any member other than the caller is the opponent
        let outcome = match members.into_iter().find(|member| member != requester_id) {
            None => FetchOutcome::WaitingForOpponent,
            Some(opponent) => {
                let raw = self
                    .store
                    .get(&sdp_key(&game_id, &opponent))
                    .await
                    .map_err(|e| self.store_fault("get", e))?;

                match raw {
                    None => FetchOutcome::NoPayloadYet { opponent },
                    Some(raw) => {
                        let payload: SignalingPayload =
                            serde_json::from_str(&raw).map_err(MatchmakingError::from)?;
                        FetchOutcome::Payload {
                            opponent,
                            description: payload.session_description,
                        }
                    }
                }
            }
        };

        debug!(
            "Fetch for {} in game {}: {}",
            requester_id,
            game_id,
            outcome.status()
        );
        self.metrics_collector.record_sdp_fetch(&outcome);

        Ok(outcome)
    }

    fn require_requester<'a>(&self, requester_id: &'a str, endpoint: &str) -> Result<&'a str> {
        non_empty(Some(requester_id)).ok_or_else(|| {
            self.metrics_collector.record_validation_failure(endpoint);
            MatchmakingError::validation("requesterId is required").into()
        })
    }

    fn store_fault(&self, operation: &str, e: anyhow::Error) -> anyhow::Error {
        error!("Signaling store operation {} failed: {}", operation, e);
        self.metrics_collector.record_store_error(operation);
        e
    }
}
