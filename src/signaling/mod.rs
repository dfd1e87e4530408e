//! Signaling relay for paired peers
//!
//! Two narrow operations scoped by (game, requester): publish a session
//! description and fetch the opposing one.

pub mod relay;

pub use relay::{SignalingRelay, DEFAULT_PAYLOAD_TTL};
