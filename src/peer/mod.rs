//! Client-side peer connection handling
//!
//! After a pairing, each side drives a [`PeerConnectionManager`] that
//! negotiates a direct transport through the signaling relay and then carries
//! moves and game-control signals over it.

pub mod loopback;
pub mod manager;
pub mod messages;
pub mod signaling_client;
pub mod transport;

// Re-export commonly used types
pub use loopback::{LoopbackNetwork, LoopbackTransportFactory};
pub use manager::{ConnectionState, PeerConfig, PeerConnectionManager, PeerEvent, PeerEventStream};
pub use messages::{ControlAction, GameControl, MovePayload, PeerMessage, DATA_CHANNEL_LABEL};
pub use signaling_client::{HttpSignalingClient, RelaySignalingClient, SignalingClient};
pub use transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory, TransportState};
