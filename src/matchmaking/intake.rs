//! Match request intake
//!
//! Validates a play request, samples its skill into a bucket and appends it to
//! the bucket's queue. The queue key is also recorded in the active-queue
//! registry so the worker never has to scan the keyspace.

use crate::error::{MatchmakingError, Result};
use crate::matchmaking::bucket::{sample_skill, DEFAULT_BUCKET_WIDTH, MAX_SKILL_MAGNITUDE};
use crate::metrics::MetricsCollector;
use crate::store::keys::{queue_key, ACTIVE_QUEUES_KEY};
use crate::store::EphemeralStore;
use crate::types::{MatchRequest, MatchRequestAck, SubmitMatchRequest};
use crate::utils::{current_timestamp, non_empty};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Intake tuning
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Width of every skill bucket
    pub bucket_width: i64,
    /// Skill used when a request omits one or sends a non-finite value
    pub default_target_skill: f64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            bucket_width: DEFAULT_BUCKET_WIDTH,
            default_target_skill: 1200.0,
        }
    }
}

/// Accepts play requests and enqueues them
#[derive(Clone)]
pub struct MatchIntake {
    store: Arc<dyn EphemeralStore>,
    config: IntakeConfig,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchIntake {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        config: IntakeConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            config,
            metrics_collector,
        }
    }

    /// Build the queued form of a request without touching the store
    pub fn prepare(&self, submission: &SubmitMatchRequest) -> Result<MatchRequest> {
        let requester_id = non_empty(submission.requester_id.as_deref())
            .ok_or_else(|| MatchmakingError::validation("requesterId is required"))?;
        let game_format = non_empty(submission.game_format.as_deref())
            .ok_or_else(|| MatchmakingError::validation("gameFormat is required"))?;

        let target_skill = submission
            .target_skill
            .filter(|skill| skill.is_finite())
            .unwrap_or(self.config.default_target_skill);
        let skill_deviation = submission
            .skill_deviation
            .filter(|deviation| deviation.is_finite())
            .unwrap_or(0.0);

        if target_skill.abs() + 3.0 * skill_deviation.max(0.0) > MAX_SKILL_MAGNITUDE {
            return Err(MatchmakingError::validation(format!(
                "targetSkill and skillDeviation must keep the sample within ±{}",
                MAX_SKILL_MAGNITUDE
            ))
            .into());
        }

        let sample = sample_skill(
            &mut rand::thread_rng(),
            target_skill,
            skill_deviation,
            self.config.bucket_width,
        );

        debug!(
            "Sampled skill {} (raw {:.1}) for {} into bucket {}",
            sample.rounded, sample.raw, requester_id, sample.bucket
        );

        Ok(MatchRequest {
            requester_id: requester_id.to_string(),
            target_skill,
            skill_deviation,
            game_format: game_format.to_string(),
            is_rated: submission.is_rated,
            submitted_at: current_timestamp(),
            computed_skill_sample: sample.rounded,
            bucket_id: sample.bucket.id(),
        })
    }

    /// Validate, bucket and enqueue a request
    pub async fn submit(&self, submission: SubmitMatchRequest) -> Result<MatchRequestAck> {
        let request = match self.prepare(&submission) {
            Ok(request) => request,
            Err(e) => {
                self.metrics_collector
                    .record_validation_failure("match-request");
                return Err(e);
            }
        };

        let key = queue_key(&request.game_format, &request.bucket_id);
        let serialized = serde_json::to_string(&request).map_err(MatchmakingError::from)?;

        let queue_len = self.store.rpush(&key, serialized).await.map_err(|e| {
            error!("Failed to enqueue request for {}: {}", request.requester_id, e);
            self.metrics_collector.record_store_error("rpush");
            e
        })?;

        self.store.sadd(ACTIVE_QUEUES_KEY, &key).await.map_err(|e| {
            error!("Failed to register queue {}: {}", key, e);
            self.metrics_collector.record_store_error("sadd");
            e
        })?;

        self.metrics_collector
            .record_request_queued(&request.game_format, request.computed_skill_sample);

        info!(
            "Queued {} in {} (skill sample {}, position {})",
            request.requester_id, key, request.computed_skill_sample, queue_len
        );

        Ok(MatchRequestAck {
            queued: true,
            queue_key: key,
            bucket: request.bucket_id,
        })
    }
}
