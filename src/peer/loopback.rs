//! In-process transport
//!
//! Two loopback transports created from the same [`LoopbackNetwork`] connect
//! once one side has applied the other's offer and the offerer has applied the
//! answer. The network can be told to drop every open link, stall candidate
//! gathering or refuse to open new channels, which is how reconnection and
//! timeout paths are driven without a real network.

use crate::error::{MatchmakingError, Result};
use crate::peer::messages::DATA_CHANNEL_LABEL;
use crate::peer::transport::{
    PeerTransport, TransportEvent, TransportEvents, TransportFactory, TransportState,
};
use crate::types::{SdpType, SessionDescription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct NetworkState {
    /// Pending descriptions by body, so the remote side can find their creator
    descriptions: HashMap<String, Weak<Endpoint>>,
    live: Vec<Weak<Endpoint>>,
    stall_gathering: bool,
    refuse_links: bool,
}

/// Shared medium for loopback transports
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, NetworkState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire loopback network lock".to_string(),
            }
            .into()
        })
    }

    /// Make gathering never complete, forcing callers onto their timeout
    pub fn set_stall_gathering(&self, stall: bool) {
        if let Ok(mut state) = self.lock() {
            state.stall_gathering = stall;
        }
    }

    /// Accept negotiation but never open the channel
    pub fn set_refuse_links(&self, refuse: bool) {
        if let Ok(mut state) = self.lock() {
            state.refuse_links = refuse;
        }
    }

    /// Drop every open link as if the network went away
    pub fn interrupt(&self) {
        let live: Vec<Arc<Endpoint>> = match self.lock() {
            Ok(state) => state.live.iter().filter_map(Weak::upgrade).collect(),
            Err(_) => return,
        };
        for endpoint in live {
            endpoint.lose_channel(TransportState::Disconnected);
        }
    }

    /// Number of endpoints whose channel is currently open
    pub fn open_channels(&self) -> usize {
        let live: Vec<Arc<Endpoint>> = match self.lock() {
            Ok(state) => state.live.iter().filter_map(Weak::upgrade).collect(),
            Err(_) => return 0,
        };
        live.iter().filter(|endpoint| endpoint.is_open()).count()
    }

    fn register(&self, endpoint: &Arc<Endpoint>) -> Result<()> {
        let mut state = self.lock()?;
        state.live.retain(|weak| weak.strong_count() > 0);
        state.live.push(Arc::downgrade(endpoint));
        Ok(())
    }

    fn publish_description(&self, body: &str, endpoint: &Arc<Endpoint>) -> Result<()> {
        let mut state = self.lock()?;
        state
            .descriptions
            .insert(body.to_string(), Arc::downgrade(endpoint));
        Ok(())
    }

    fn resolve(&self, body: &str) -> Result<Arc<Endpoint>> {
        let state = self.lock()?;
        state
            .descriptions
            .get(body)
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                MatchmakingError::TransportFailed {
                    message: "Remote description does not belong to a live transport".to_string(),
                }
                .into()
            })
    }

    fn forget(&self, body: &str) {
        if let Ok(mut state) = self.lock() {
            state.descriptions.remove(body);
        }
    }
}

#[derive(Default)]
struct EndpointState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    peer: Option<Weak<Endpoint>>,
    open: bool,
    closed: bool,
}

struct Endpoint {
    id: Uuid,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    fn lock(&self) -> Result<MutexGuard<'_, EndpointState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire loopback endpoint lock".to_string(),
            }
            .into()
        })
    }

    fn emit(&self, event: TransportEvent) {
        // The owner may already have dropped its receiver
        let _ = self.events.send(event);
    }

    fn is_open(&self) -> bool {
        self.lock().map(|state| state.open).unwrap_or(false)
    }

    fn open_channel(&self) {
        let opened = match self.lock() {
            Ok(mut state) if !state.closed && !state.open => {
                state.open = true;
                true
            }
            _ => false,
        };
        if opened {
            self.emit(TransportEvent::StateChanged(TransportState::Connected));
            self.emit(TransportEvent::ChannelOpen);
        }
    }

    fn lose_channel(&self, reason: TransportState) {
        let was_open = match self.lock() {
            Ok(mut state) => std::mem::replace(&mut state.open, false),
            Err(_) => false,
        };
        if was_open {
            self.emit(TransportEvent::StateChanged(reason));
            self.emit(TransportEvent::ChannelClosed);
        }
    }
}

/// Transport half backed by a [`LoopbackNetwork`]
pub struct LoopbackTransport {
    endpoint: Arc<Endpoint>,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    fn new(network: LoopbackNetwork) -> Result<(Self, TransportEvents)> {
        let (events, receiver) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Endpoint {
            id: Uuid::new_v4(),
            events,
            state: Mutex::new(EndpointState::default()),
        });
        network.register(&endpoint)?;
        Ok((Self { endpoint, network }, receiver))
    }

    fn description(&self, sdp_type: SdpType) -> SessionDescription {
        let body = format!(
            "v=0\r\no=loopback {} {}\r\na=label:{}\r\n",
            self.endpoint.id, sdp_type, DATA_CHANNEL_LABEL
        );
        SessionDescription { sdp_type, sdp: body }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.endpoint.lock()?.closed {
            return Err(MatchmakingError::TransportFailed {
                message: "Transport already closed".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_usable()?;
        let offer = self.description(SdpType::Offer);
        self.network.publish_description(&offer.sdp, &self.endpoint)?;
        self.endpoint.lock()?.local = Some(offer.clone());
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_usable()?;
        let has_offer = self
            .endpoint
            .lock()?
            .remote
            .as_ref()
            .is_some_and(|remote| remote.sdp_type == SdpType::Offer);
        if !has_offer {
            return Err(MatchmakingError::TransportFailed {
                message: "Cannot answer without a remote offer".to_string(),
            }
            .into());
        }

        let answer = self.description(SdpType::Answer);
        self.network.publish_description(&answer.sdp, &self.endpoint)?;
        self.endpoint.lock()?.local = Some(answer.clone());
        Ok(answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_usable()?;
        let remote = self.network.resolve(&description.sdp)?;
        let sdp_type = description.sdp_type;

        {
            let mut state = self.endpoint.lock()?;
            state.remote = Some(description);
            state.peer = Some(Arc::downgrade(&remote));
        }

        if sdp_type == SdpType::Answer {
            // The answerer already points at us; both halves are now linked
            let refuse = self.network.lock()?.refuse_links;
            if refuse {
                debug!("Loopback link refused for {}", self.endpoint.id);
                return Ok(());
            }
            self.endpoint.open_channel();
            remote.open_channel();
        }

        Ok(())
    }

    async fn wait_gathering_complete(&self) {
        let stalled = self
            .network
            .lock()
            .map(|state| state.stall_gathering)
            .unwrap_or(false);
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.endpoint
            .lock()
            .ok()
            .and_then(|state| state.local.clone())
    }

    fn is_channel_open(&self) -> bool {
        self.endpoint.is_open()
    }

    fn send(&self, frame: String) -> Result<()> {
        let peer = {
            let state = self.endpoint.lock()?;
            if !state.open {
                return Err(MatchmakingError::TransportFailed {
                    message: "Data channel not open".to_string(),
                }
                .into());
            }
            state.peer.as_ref().and_then(Weak::upgrade)
        };

        match peer {
            Some(peer) if peer.is_open() => {
                peer.emit(TransportEvent::Message(frame));
                Ok(())
            }
            _ => Err(MatchmakingError::TransportFailed {
                message: "Remote peer is gone".to_string(),
            }
            .into()),
        }
    }

    fn close(&self) {
        let (peer, local) = match self.endpoint.lock() {
            Ok(mut state) if !state.closed => {
                state.closed = true;
                state.open = false;
                (state.peer.take(), state.local.take())
            }
            _ => return,
        };

        if let Some(local) = local {
            self.network.forget(&local.sdp);
        }
        if let Some(peer) = peer.and_then(|weak| weak.upgrade()) {
            peer.lose_channel(TransportState::Disconnected);
        }
        self.endpoint
            .emit(TransportEvent::StateChanged(TransportState::Closed));
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Factory handing out loopback transports on one network
#[derive(Clone, Default)]
pub struct LoopbackTransportFactory {
    network: LoopbackNetwork,
}

impl LoopbackTransportFactory {
    pub fn new(network: LoopbackNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

impl TransportFactory for LoopbackTransportFactory {
    fn create(&self, _initiator: bool) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (transport, events) = LoopbackTransport::new(self.network.clone())?;
        Ok((Arc::new(transport), events))
    }
}
