//! Transport abstraction under the peer connection manager
//!
//! A transport is one peer connection plus its single data channel. Creating
//! a local description also applies it; gathering may refine that description
//! afterwards, so callers read [`PeerTransport::local_description`] once
//! gathering is done (or has timed out).

use crate::error::Result;
use crate::types::SessionDescription;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection-level state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// States after which the channel can no longer carry messages
    pub fn is_lost(self) -> bool {
        matches!(
            self,
            TransportState::Disconnected | TransportState::Failed | TransportState::Closed
        )
    }
}

/// Notifications pushed by a transport to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The data channel is open in both directions
    ChannelOpen,
    /// The data channel closed
    ChannelClosed,
    /// A text frame arrived on the data channel
    Message(String),
    StateChanged(TransportState),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One peer connection with its data channel
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create and apply a local offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create and apply a local answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Resolves once candidate gathering has completed. May never resolve.
    async fn wait_gathering_complete(&self);

    /// Latest applied local description
    fn local_description(&self) -> Option<SessionDescription>;

    fn is_channel_open(&self) -> bool;

    /// Send a text frame on the data channel
    fn send(&self, frame: String) -> Result<()>;

    /// Close the channel and the connection. Idempotent.
    fn close(&self);
}

/// Builds fresh transports; every connection attempt gets a new one
pub trait TransportFactory: Send + Sync {
    fn create(&self, initiator: bool) -> Result<(Arc<dyn PeerTransport>, TransportEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_states() {
        assert!(TransportState::Disconnected.is_lost());
        assert!(TransportState::Failed.is_lost());
        assert!(TransportState::Closed.is_lost());
        assert!(!TransportState::Connected.is_lost());
        assert!(!TransportState::Connecting.is_lost());
    }
}
