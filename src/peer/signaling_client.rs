//! Client side of the signaling relay
//!
//! The connection manager only needs publish and fetch-opposing. Those are
//! served either in-process by a [`SignalingRelay`] or over HTTP by a running
//! pairhouse service.

use crate::error::{MatchmakingError, Result};
use crate::signaling::SignalingRelay;
use crate::types::{
    FetchOutcome, FetchSdpResponse, GameId, PublishSdpRequest, SessionDescription, StatusResponse,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Per-request timeout for the HTTP client
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn publish(
        &self,
        game_id: GameId,
        requester_id: &str,
        description: SessionDescription,
    ) -> Result<()>;

    async fn fetch_opposing(&self, game_id: GameId, requester_id: &str) -> Result<FetchOutcome>;
}

/// Talks to a relay living in the same process
#[derive(Clone)]
pub struct RelaySignalingClient {
    relay: SignalingRelay,
}

impl RelaySignalingClient {
    pub fn new(relay: SignalingRelay) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl SignalingClient for RelaySignalingClient {
    async fn publish(
        &self,
        game_id: GameId,
        requester_id: &str,
        description: SessionDescription,
    ) -> Result<()> {
        self.relay.publish(game_id, requester_id, description).await
    }

    async fn fetch_opposing(&self, game_id: GameId, requester_id: &str) -> Result<FetchOutcome> {
        self.relay.fetch_opposing(game_id, requester_id).await
    }
}

/// Talks to the `/send-sdp` and `/get-sdp` endpoints of a running service
#[derive(Clone)]
pub struct HttpSignalingClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpSignalingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pairhouse/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn signaling_error(err: impl std::fmt::Display) -> anyhow::Error {
    MatchmakingError::Signaling {
        message: err.to_string(),
    }
    .into()
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    async fn publish(
        &self,
        game_id: GameId,
        requester_id: &str,
        description: SessionDescription,
    ) -> Result<()> {
        let body = PublishSdpRequest {
            game_id: game_id.to_string(),
            requester_id: requester_id.to_string(),
            sdp: description,
        };

        let response = self
            .http_client
            .post(format!("{}/send-sdp", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(signaling_error)?;

        if !response.status().is_success() {
            return Err(signaling_error(format!(
                "send-sdp returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_opposing(&self, game_id: GameId, requester_id: &str) -> Result<FetchOutcome> {
        let game_id = game_id.to_string();
        let response = self
            .http_client
            .get(format!("{}/get-sdp", self.base_url))
            .query(&[("gameId", game_id.as_str()), ("requesterId", requester_id)])
            .send()
            .await
            .map_err(signaling_error)?;

        match response.status() {
            StatusCode::OK => {
                let body: FetchSdpResponse = response.json().await.map_err(signaling_error)?;
                Ok(FetchOutcome::Payload {
                    opponent: body.opponent,
                    description: body.sdp,
                })
            }
            StatusCode::NOT_FOUND => {
                let body: StatusResponse = response.json().await.map_err(signaling_error)?;
                match body.status.as_str() {
                    "waiting_for_opponent" => Ok(FetchOutcome::WaitingForOpponent),
                    "no_payload_yet" => Ok(FetchOutcome::NoPayloadYet {
                        opponent: body.opponent.unwrap_or_default(),
                    }),
                    other => Err(signaling_error(format!(
                        "get-sdp returned unknown status {}",
                        other
                    ))),
                }
            }
            status => Err(signaling_error(format!("get-sdp returned {}", status))),
        }
    }
}
