//! Error types for the pairing service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Request handlers downcast to [`MatchmakingError`]
//! to decide what the caller sees.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking and signaling scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("Store unavailable during {operation}: {message}")]
    StoreUnavailable { operation: String, message: String },

    #[error("Key holds a value of the wrong type: {key}")]
    StoreTypeMismatch { key: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Negotiation timed out while {stage}")]
    NegotiationTimeout { stage: String },

    #[error("Peer connection abandoned after {attempts} reconnection attempts")]
    Abandoned { attempts: u32 },

    #[error("Peer transport failed: {message}")]
    TransportFailed { message: String },

    #[error("Signaling request failed: {message}")]
    Signaling { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for a validation failure
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a store fault on the named operation
    pub fn store_unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::Signaling { .. })
    }
}

impl From<serde_json::Error> for MatchmakingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
