//! Common types used throughout the pairing service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the player submitting requests (issued by the session provider)
pub type RequesterId = String;

/// Opaque identifier shared by the two sides of a pairing
pub type GameId = Uuid;

/// Role assigned to each side of a pairing. White always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The complementary role
    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn is_first_mover(self) -> bool {
        self == Side::White
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::White => write!(f, "white"),
            Side::Black => write!(f, "black"),
        }
    }
}

/// A bucketed play request as it sits in a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub requester_id: RequesterId,
    pub target_skill: f64,
    pub skill_deviation: f64,
    pub game_format: String,
    pub is_rated: bool,
    pub submitted_at: DateTime<Utc>,
    /// Sampled, clipped and rounded skill used for bucketing
    pub computed_skill_sample: i64,
    pub bucket_id: String,
}

/// The other side of a pairing, as seen by one requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opponent {
    #[serde(alias = "username")]
    pub requester_id: RequesterId,
    #[serde(default, alias = "rating", skip_serializing_if = "Option::is_none")]
    pub target_skill: Option<f64>,
}

/// Pairing result stored per requester until it expires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub game_id: GameId,
    pub opponent: Opponent,
    #[serde(alias = "orientation")]
    pub assigned_side: Side,
    pub created_at: DateTime<Utc>,
}

/// Kind of session-negotiation blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Session description exchanged during negotiation. The body is opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A published negotiation payload, scoped to (game, requester)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingPayload {
    pub game_id: GameId,
    pub requester_id: RequesterId,
    pub session_description: SessionDescription,
    pub published_at: DateTime<Utc>,
}

/// Result of a match poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Matched(MatchRecord),
    /// No record yet, or it already expired. The two are indistinguishable.
    Pending,
}

/// Result of fetching the opposing peer's negotiation payload
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Nobody but the caller has published in this game
    WaitingForOpponent,
    /// The opponent is known but its payload is absent or expired
    NoPayloadYet { opponent: RequesterId },
    Payload {
        opponent: RequesterId,
        description: SessionDescription,
    },
}

impl FetchOutcome {
    /// Status label used on the wire and in metrics
    pub fn status(&self) -> &'static str {
        match self {
            FetchOutcome::WaitingForOpponent => "waiting_for_opponent",
            FetchOutcome::NoPayloadYet { .. } => "no_payload_yet",
            FetchOutcome::Payload { .. } => "payload",
        }
    }
}

/// HTTP Message Types
/// Body of `POST /match-request`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMatchRequest {
    #[serde(default, alias = "username")]
    pub requester_id: Option<RequesterId>,
    #[serde(default)]
    pub game_format: Option<String>,
    #[serde(default, alias = "targetRating")]
    pub target_skill: Option<f64>,
    #[serde(default, alias = "deviation")]
    pub skill_deviation: Option<f64>,
    #[serde(default)]
    pub is_rated: bool,
}

/// Acknowledgement returned once a request has been queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequestAck {
    pub queued: bool,
    pub queue_key: String,
    pub bucket: String,
}

/// Body of `POST /send-sdp`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishSdpRequest {
    pub game_id: String,
    #[serde(alias = "username")]
    pub requester_id: RequesterId,
    pub sdp: SessionDescription,
}

/// Query of `GET /get-sdp`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSdpQuery {
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default, alias = "username")]
    pub requester_id: Option<RequesterId>,
}

/// Query of `GET /poll-match`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollMatchQuery {
    #[serde(default, alias = "username")]
    pub requester_id: Option<RequesterId>,
}

/// Non-terminal status body (`pending`, `waiting_for_opponent`, `no_payload_yet`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    /// Set for `no_payload_yet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent: Option<RequesterId>,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            opponent: None,
        }
    }
}

/// Successful `GET /get-sdp` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSdpResponse {
    pub sdp: SessionDescription,
    #[serde(default)]
    pub opponent: RequesterId,
}
