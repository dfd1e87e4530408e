//! Mapping from service errors to HTTP responses

use crate::error::MatchmakingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Error returned by API handlers
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl ApiError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self(MatchmakingError::validation(reason).into())
    }

    /// Status code this error maps to
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<MatchmakingError>() {
            Some(MatchmakingError::Validation { .. }) => StatusCode::BAD_REQUEST,
            Some(MatchmakingError::StoreUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match status {
            StatusCode::BAD_REQUEST => json!({ "error": self.0.to_string() }),
            StatusCode::SERVICE_UNAVAILABLE => json!({
                "error": self.0.to_string(),
                "retryable": true
            }),
            _ => {
                error!("Request failed: {:#}", self.0);
                json!({ "error": "Internal server error" })
            }
        };

        (status, Json(body)).into_response()
    }
}
