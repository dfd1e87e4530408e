//! Key layout shared by every component that touches the store

use crate::types::GameId;

/// Set of queue keys that have seen traffic
pub const ACTIVE_QUEUES_KEY: &str = "active_queues";

/// `queue:{gameFormat}:{bucketLower}-{bucketUpper}`
pub fn queue_key(game_format: &str, bucket_id: &str) -> String {
    format!("queue:{}:{}", game_format, bucket_id)
}

/// `match:{requesterId}`
pub fn match_key(requester_id: &str) -> String {
    format!("match:{}", requester_id)
}

/// `sdp:{gameId}:{requesterId}`
pub fn sdp_key(game_id: &GameId, requester_id: &str) -> String {
    format!("sdp:{}:{}", game_id, requester_id)
}

/// `game_players:{gameId}`
pub fn presence_key(game_id: &GameId) -> String {
    format!("game_players:{}", game_id)
}
