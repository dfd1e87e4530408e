//! Pairhouse - skill-bucketed matchmaking and peer signaling for chess games
//!
//! Requesters submit play requests over HTTP, a background worker pairs the
//! two oldest requests of each skill bucket, and both sides pick up their
//! pairing and negotiate a direct peer connection through the signaling relay.
//! Everything shared lives in a TTL-capable ephemeral store.

pub mod api;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod peer;
pub mod service;
pub mod signaling;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matchmaking::{MatchDelivery, MatchIntake, MatchmakerWorker};
pub use peer::{PeerConnectionManager, PeerEvent};
pub use signaling::SignalingRelay;
pub use store::{EphemeralStore, InMemoryEphemeralStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
