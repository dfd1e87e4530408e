//! Match delivery
//!
//! Looks up a requester's match record. Records are never deleted on read, so
//! repeated polls inside the TTL window return the same result.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::store::keys::match_key;
use crate::store::EphemeralStore;
use crate::types::{MatchRecord, PollOutcome};
use crate::utils::non_empty;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct MatchDelivery {
    store: Arc<dyn EphemeralStore>,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchDelivery {
    pub fn new(store: Arc<dyn EphemeralStore>, metrics_collector: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            metrics_collector,
        }
    }

    /// Return the pairing for `requester_id`, or `Pending` when there is none
    pub async fn poll(&self, requester_id: &str) -> Result<PollOutcome> {
        let requester_id = match non_empty(Some(requester_id)) {
            Some(id) => id,
            None => {
                self.metrics_collector.record_validation_failure("poll-match");
                return Err(MatchmakingError::validation("requesterId is required").into());
            }
        };

        let raw = self.store.get(&match_key(requester_id)).await.map_err(|e| {
            error!("Failed to read match record for {}: {}", requester_id, e);
            self.metrics_collector.record_store_error("get");
            e
        })?;

        let outcome = match raw {
            Some(raw) => {
                let record: MatchRecord =
                    serde_json::from_str(&raw).map_err(MatchmakingError::from)?;
                debug!(
                    "Delivering game {} to {} as {}",
                    record.game_id, requester_id, record.assigned_side
                );
                PollOutcome::Matched(record)
            }
            None => PollOutcome::Pending,
        };

        self.metrics_collector
            .record_match_poll(matches!(outcome, PollOutcome::Matched(_)));
        Ok(outcome)
    }
}
