//! Matchmaking and signaling HTTP API
//!
//! Four endpoints, all thin wrappers over the intake, delivery and relay
//! handlers. Pending states are answered with non-error bodies.

use crate::api::error::ApiError;
use crate::matchmaking::{MatchDelivery, MatchIntake};
use crate::metrics::MetricsCollector;
use crate::signaling::SignalingRelay;
use crate::types::{
    FetchOutcome, FetchSdpQuery, FetchSdpResponse, GameId, PollMatchQuery, PollOutcome,
    PublishSdpRequest, StatusResponse, SubmitMatchRequest,
};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Handlers shared by every route
#[derive(Clone)]
pub struct ApiState {
    pub intake: MatchIntake,
    pub delivery: MatchDelivery,
    pub relay: SignalingRelay,
    pub metrics_collector: Arc<MetricsCollector>,
}

/// HTTP server for the matchmaking and signaling endpoints
pub struct ApiServer {
    config: ApiServerConfig,
    state: ApiState,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: ApiState) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid API server address")?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;
        Ok(listener)
    }

    /// Serve on an already bound listener until [`ApiServer::stop`] is called
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("API server listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API server shutdown signal received");
            })
            .await?;

        info!("API server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to API server: {}", e);
        }
        Ok(())
    }
}

/// Build the API router over the given handlers
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/match-request", post(submit_match_request))
        .route("/poll-match", get(poll_match))
        .route("/send-sdp", post(send_sdp))
        .route("/get-sdp", get(get_sdp))
        .with_state(state)
}

fn parse_game_id(raw: Option<&str>) -> Result<GameId, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::validation("gameId is required"))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::validation(format!("Invalid gameId: {}", raw)))
}

async fn submit_match_request(
    State(state): State<ApiState>,
    body: Result<Json<SubmitMatchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| {
        state
            .metrics_collector
            .record_validation_failure("match-request");
        ApiError::validation(e.body_text())
    })?;

    let ack = state.intake.submit(body).await?;
    Ok((StatusCode::OK, Json(ack)).into_response())
}

async fn poll_match(
    State(state): State<ApiState>,
    query: Result<Query<PollMatchQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    let requester_id = query.requester_id.unwrap_or_default();

    match state.delivery.poll(&requester_id).await? {
        PollOutcome::Matched(record) => Ok((StatusCode::OK, Json(record)).into_response()),
        PollOutcome::Pending => {
            debug!("No match yet for {}", requester_id);
            Ok((StatusCode::ACCEPTED, Json(StatusResponse::new("pending"))).into_response())
        }
    }
}

async fn send_sdp(
    State(state): State<ApiState>,
    body: Result<Json<PublishSdpRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| {
        state.metrics_collector.record_validation_failure("send-sdp");
        ApiError::validation(e.body_text())
    })?;
    let game_id = parse_game_id(Some(&body.game_id))?;

    state
        .relay
        .publish(game_id, &body.requester_id, body.sdp)
        .await?;
    Ok((StatusCode::OK, Json(json!({ "ok": true }))).into_response())
}

async fn get_sdp(
    State(state): State<ApiState>,
    query: Result<Query<FetchSdpQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    let game_id = parse_game_id(query.game_id.as_deref())?;
    let requester_id = query.requester_id.unwrap_or_default();

    let outcome = state.relay.fetch_opposing(game_id, &requester_id).await?;
    let status = outcome.status();
    let response = match outcome {
        FetchOutcome::Payload {
            opponent,
            description,
        } => (
            StatusCode::OK,
            Json(json!(FetchSdpResponse {
                sdp: description,
                opponent,
            })),
        ),
        FetchOutcome::NoPayloadYet { opponent } => (
            StatusCode::NOT_FOUND,
            Json(json!(StatusResponse {
                status: status.to_string(),
                opponent: Some(opponent),
            })),
        ),
        FetchOutcome::WaitingForOpponent => (
            StatusCode::NOT_FOUND,
            Json(json!(StatusResponse::new(status))),
        ),
    };

    Ok(response.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::{IntakeConfig, MatchmakerWorker, WorkerConfig};
    use crate::store::{EphemeralStore, InMemoryEphemeralStore, MockEphemeralStore};
    use crate::store::keys::ACTIVE_QUEUES_KEY;
    use crate::types::MatchRecord;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt; // for oneshot

    fn api_state(store: Arc<dyn EphemeralStore>) -> ApiState {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        ApiState {
            intake: MatchIntake::new(store.clone(), IntakeConfig::default(), metrics.clone()),
            delivery: MatchDelivery::new(store.clone(), metrics.clone()),
            relay: SignalingRelay::new(store, Duration::from_secs(120), metrics.clone()),
            metrics_collector: metrics,
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_uri(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_match_request_is_queued() {
        let app = router(api_state(Arc::new(InMemoryEphemeralStore::new())));

        let response = app
            .oneshot(post_json(
                "/match-request",
                json!({"username": "alice", "gameFormat": "rapid", "targetRating": 1200, "deviation": 0}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["queued"], true);
        assert_eq!(body["queueKey"], "queue:rapid:1200-1250");
    }

    #[tokio::test]
    async fn test_match_request_validation() {
        let app = router(api_state(Arc::new(InMemoryEphemeralStore::new())));

        let response = app
            .clone()
            .oneshot(post_json("/match-request", json!({"requesterId": "alice"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("gameFormat"));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/match-request")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_huge_target_skill_is_a_bad_request() {
        let store = Arc::new(InMemoryEphemeralStore::new());
        let app = router(api_state(store.clone()));

        let response = app
            .oneshot(post_json(
                "/match-request",
                json!({"requesterId": "a", "gameFormat": "rapid", "targetSkill": 1e300}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.smembers(ACTIVE_QUEUES_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_pending_then_matched() {
        let store = Arc::new(InMemoryEphemeralStore::new());
        let state = api_state(store.clone());
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(get_uri("/poll-match?requesterId=alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["status"], "pending");

        for requester in ["alice", "bob"] {
            app.clone()
                .oneshot(post_json(
                    "/match-request",
                    json!({"requesterId": requester, "gameFormat": "rapid", "targetSkill": 1200}),
                ))
                .await
                .unwrap();
        }
        let worker = MatchmakerWorker::new(
            store,
            WorkerConfig::default(),
            state.metrics_collector.clone(),
        );
        worker.run_cycle().await.unwrap();

        let response = app
            .oneshot(get_uri("/poll-match?username=alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: MatchRecord = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(record.opponent.requester_id, "bob");
    }

    #[tokio::test]
    async fn test_signaling_endpoints() {
        let app = router(api_state(Arc::new(InMemoryEphemeralStore::new())));
        let game_id = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(get_uri(&format!(
                "/get-sdp?gameId={}&requesterId=bob",
                game_id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["status"], "waiting_for_opponent");

        let response = app
            .clone()
            .oneshot(post_json(
                "/send-sdp",
                json!({"gameId": game_id, "username": "alice", "sdp": {"type": "offer", "sdp": "v=0"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);

        let response = app
            .oneshot(get_uri(&format!(
                "/get-sdp?gameId={}&requesterId=bob",
                game_id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sdp"]["type"], "offer");
        assert_eq!(body["opponent"], "alice");
    }

    #[tokio::test]
    async fn test_invalid_game_id_is_rejected() {
        let app = router(api_state(Arc::new(InMemoryEphemeralStore::new())));

        let response = app
            .clone()
            .oneshot(get_uri("/get-sdp?gameId=not-a-uuid&requesterId=bob"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(get_uri("/get-sdp?requesterId=bob"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let mut store = MockEphemeralStore::new();
        store.expect_get().returning(|_| {
            Err(crate::error::MatchmakingError::store_unavailable("get", "connection refused").into())
        });
        let app = router(api_state(Arc::new(store)));

        let response = app
            .oneshot(get_uri("/poll-match?requesterId=alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["retryable"], true);
    }
}
