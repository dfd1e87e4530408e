//! Peer connection manager
//!
//! Owns one game's direct connection: negotiation through the signaling
//! relay, monitoring, reconnection with exponential backoff and message
//! exchange. Owners observe it through [`PeerConnectionManager::subscribe`].
//!
//! All work for a session runs in one spawned driver task. Every state change
//! the driver makes is checked against the session generation under the state
//! lock, and [`PeerConnectionManager::cleanup`] bumps the generation before
//! tearing down, so a cleanup always wins over anything still in flight.

use crate::error::{MatchmakingError, Result};
use crate::peer::messages::{GameControl, MovePayload, PeerMessage};
use crate::peer::signaling_client::SignalingClient;
use crate::peer::transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
use crate::types::{FetchOutcome, GameId, RequesterId, SdpType, SessionDescription};
use crate::utils::backoff_delay;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the event channel; slow subscribers skip older events
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    /// Reconnection attempts are exhausted; terminal until cleanup
    Abandoned,
}

/// Events delivered to the owner of a manager
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The channel opened for the first time
    Connected,
    Disconnected,
    Reconnecting { attempt: u32, max: u32 },
    /// The channel opened again after a disconnect
    Reconnected,
    /// Reconnection gave up; the game should end as abandoned
    ReconnectFailed,
    Move(MovePayload),
    GameControl(GameControl),
}

pub type PeerEventStream = Pin<Box<dyn Stream<Item = PeerEvent> + Send>>;

/// Client-side timing and retry policy
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Upper bound on waiting for candidate gathering
    pub ice_gathering_timeout: Duration,
    /// Interval between fetch-opposing polls
    pub signal_poll_interval: Duration,
    /// Polls before an offer/answer wait counts as failed
    pub max_signal_polls: u32,
    /// Upper bound on waiting for the channel after the handshake
    pub channel_open_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_gathering_timeout: Duration::from_secs(2),
            signal_poll_interval: Duration::from_millis(1500),
            max_signal_polls: 40,
            channel_open_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    game_id: GameId,
    requester_id: RequesterId,
    initiator: bool,
}

struct ManagerState {
    state: ConnectionState,
    attempt: u32,
    generation: u64,
    session: Option<Session>,
    transport: Option<Arc<dyn PeerTransport>>,
    cancel: Option<CancellationToken>,
    /// Remote descriptions already applied; republished copies are stale
    consumed: HashSet<String>,
    has_connected: bool,
}

impl ManagerState {
    fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            generation: 0,
            session: None,
            transport: None,
            cancel: None,
            consumed: HashSet::new(),
            has_connected: false,
        }
    }
}

struct Shared {
    signaling: Arc<dyn SignalingClient>,
    factory: Arc<dyn TransportFactory>,
    config: PeerConfig,
    state: Mutex<ManagerState>,
    events: broadcast::Sender<PeerEvent>,
}

/// Manages the direct connection to the opponent for one game at a time
#[derive(Clone)]
pub struct PeerConnectionManager {
    shared: Arc<Shared>,
}

impl PeerConnectionManager {
    pub fn new(
        signaling: Arc<dyn SignalingClient>,
        factory: Arc<dyn TransportFactory>,
        config: PeerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                signaling,
                factory,
                config,
                state: Mutex::new(ManagerState::idle()),
                events,
            }),
        }
    }

    /// Stream of events from now on
    pub fn subscribe(&self) -> PeerEventStream {
        let stream = BroadcastStream::new(self.shared.events.subscribe())
            .filter_map(|event| event.ok());
        Box::pin(stream)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .lock()
            .map(|state| state.state)
            .unwrap_or(ConnectionState::Idle)
    }

    /// Current reconnection attempt (0 while connected or idle)
    pub fn attempt(&self) -> u32 {
        self.shared.lock().map(|state| state.attempt).unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    /// Start connecting to the opponent of `game_id`.
    /// The initiator publishes the offer; the other side answers it.
    pub fn init(&self, game_id: GameId, requester_id: &str, initiator: bool) -> Result<()> {
        let (generation, cancel) = {
            let mut state = self.shared.lock()?;
            if state.state != ConnectionState::Idle {
                return Err(MatchmakingError::InternalError {
                    message: format!(
                        "Peer connection already {:?}; clean up before starting another",
                        state.state
                    ),
                }
                .into());
            }

            let cancel = CancellationToken::new();
            state.generation += 1;
            state.state = ConnectionState::Connecting;
            state.attempt = 0;
            state.has_connected = false;
            state.consumed.clear();
            state.session = Some(Session {
                game_id,
                requester_id: requester_id.to_string(),
                initiator,
            });
            state.cancel = Some(cancel.clone());
            (state.generation, cancel)
        };

        info!(
            "Connecting to opponent in game {} as {} ({})",
            game_id,
            requester_id,
            if initiator { "initiator" } else { "responder" }
        );

        let shared = self.shared.clone();
        tokio::spawn(async move { shared.drive(generation, cancel).await });
        Ok(())
    }

    /// Send a move; returns false (and logs) when the channel is not open
    pub fn send_move(&self, payload: MovePayload) -> bool {
        self.send(PeerMessage::Move(payload))
    }

    /// Send a game-control signal; returns false when the channel is not open
    pub fn send_game_control(&self, control: GameControl) -> bool {
        self.send(PeerMessage::GameControl(control))
    }

    fn send(&self, message: PeerMessage) -> bool {
        let transport = match self.shared.lock() {
            Ok(state) if state.state == ConnectionState::Connected => state.transport.clone(),
            _ => None,
        };

        let transport = match transport {
            Some(transport) if transport.is_channel_open() => transport,
            _ => {
                warn!("Data channel not open, dropping {:?}", message);
                return false;
            }
        };

        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode peer message: {}", e);
                return false;
            }
        };

        match transport.send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send on data channel: {}", e);
                false
            }
        }
    }

    /// Cancel in-flight work, close the transport and reset to `Idle`.
    /// Safe from any state and idempotent.
    pub fn cleanup(&self) {
        let (transport, cancel) = match self.shared.lock() {
            Ok(mut state) => {
                state.generation += 1;
                state.state = ConnectionState::Idle;
                state.attempt = 0;
                state.session = None;
                state.has_connected = false;
                state.consumed.clear();
                (state.transport.take(), state.cancel.take())
            }
            Err(e) => {
                error!("Peer manager state poisoned during cleanup: {}", e);
                return;
            }
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(transport) = transport {
            transport.close();
            debug!("Peer transport closed by cleanup");
        }
    }
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, ManagerState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire peer manager lock".to_string(),
            }
            .into()
        })
    }

    fn emit(&self, event: PeerEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Run `f` on the state only if the session is still current
    fn with_current<T>(&self, generation: u64, f: impl FnOnce(&mut ManagerState) -> T) -> Option<T> {
        let mut state = self.lock().ok()?;
        if state.generation != generation {
            return None;
        }
        Some(f(&mut state))
    }

    fn session(&self, generation: u64) -> Option<Session> {
        self.with_current(generation, |state| state.session.clone())
            .flatten()
    }

    async fn drive(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let Some(session) = self.session(generation) else {
            return;
        };

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.connect_once(generation, &session) => result,
            };

            match connected {
                Ok((transport, events)) => {
                    if !self.mark_connected(generation) {
                        transport.close();
                        return;
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = self.monitor(events) => {}
                    }

                    let still_current = self.with_current(generation, |state| {
                        state.state = ConnectionState::Disconnected;
                        self.emit(PeerEvent::Disconnected);
                    });
                    if still_current.is_none() {
                        return;
                    }
                    warn!("Peer connection lost in game {}", session.game_id);
                }
                Err(e) => {
                    warn!(
                        "Connection attempt in game {} failed: {}",
                        session.game_id, e
                    );
                }
            }

            let delay = match self.schedule_retry(generation) {
                Some(delay) => delay,
                None => return,
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Decide what follows a failure. Returns the backoff delay, or `None`
    /// once the session is abandoned or no longer current.
    fn schedule_retry(&self, generation: u64) -> Option<Duration> {
        let max = self.config.max_reconnect_attempts;
        // Each event is emitted under the lock, together with its state change
        let (attempt, transport) = self.with_current(generation, |state| {
            if state.attempt >= max {
                state.state = ConnectionState::Abandoned;
                self.emit(PeerEvent::ReconnectFailed);
                (None, state.transport.take())
            } else {
                state.attempt += 1;
                state.state = ConnectionState::Reconnecting;
                self.emit(PeerEvent::Reconnecting {
                    attempt: state.attempt,
                    max,
                });
                (Some(state.attempt), None)
            }
        })?;

        match attempt {
            Some(attempt) => {
                let delay = backoff_delay(self.config.reconnect_base_delay, attempt);
                info!(
                    "Reconnecting (attempt {}/{}) in {:?}",
                    attempt, max, delay
                );
                Some(delay)
            }
            None => {
                if let Some(transport) = transport {
                    transport.close();
                }
                let err = MatchmakingError::Abandoned { attempts: max };
                error!("{}", err);
                None
            }
        }
    }

    fn mark_connected(&self, generation: u64) -> bool {
        let reconnected = self.with_current(generation, |state| {
            let reconnected = state.has_connected;
            state.state = ConnectionState::Connected;
            state.attempt = 0;
            state.has_connected = true;
            self.emit(if reconnected {
                PeerEvent::Reconnected
            } else {
                PeerEvent::Connected
            });
            reconnected
        });

        match reconnected {
            Some(true) => {
                info!("Peer connection re-established");
                true
            }
            Some(false) => {
                info!("Peer connection established");
                true
            }
            None => false,
        }
    }

    /// One full negotiation on a fresh transport, up to an open channel
    async fn connect_once(
        &self,
        generation: u64,
        session: &Session,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (transport, mut events) = self.factory.create(session.initiator)?;

        let previous = self.with_current(generation, |state| {
            state.transport.replace(transport.clone())
        });
        match previous {
            Some(Some(old)) => old.close(),
            Some(None) => {}
            None => {
                transport.close();
                return Err(MatchmakingError::InternalError {
                    message: "Peer session was cleaned up".to_string(),
                }
                .into());
            }
        }

        if session.initiator {
            let offer = transport.create_offer().await?;
            let offer = self.gathered_description(transport.as_ref(), offer).await;
            self.shared_publish(session, offer).await?;

            let answer = self
                .await_remote(generation, session, SdpType::Answer)
                .await?;
            transport.set_remote_description(answer).await?;
        } else {
            let offer = self.await_remote(generation, session, SdpType::Offer).await?;
            transport.set_remote_description(offer).await?;

            let answer = transport.create_answer().await?;
            let answer = self.gathered_description(transport.as_ref(), answer).await;
            self.shared_publish(session, answer).await?;
        }

        let opened = tokio::time::timeout(self.config.channel_open_timeout, async {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::ChannelOpen => return Ok(()),
                    TransportEvent::ChannelClosed => break,
                    TransportEvent::StateChanged(state) if state.is_lost() => break,
                    _ => {}
                }
            }
            Err(MatchmakingError::TransportFailed {
                message: "Transport closed before the channel opened".to_string(),
            })
        })
        .await;

        match opened {
            Ok(Ok(())) => Ok((transport, events)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(MatchmakingError::NegotiationTimeout {
                stage: "waiting for the data channel".to_string(),
            }
            .into()),
        }
    }

    /// Wait for gathering within the bound, then take whatever is available
    async fn gathered_description(
        &self,
        transport: &dyn PeerTransport,
        fallback: SessionDescription,
    ) -> SessionDescription {
        let gathered = tokio::time::timeout(
            self.config.ice_gathering_timeout,
            transport.wait_gathering_complete(),
        )
        .await;

        if gathered.is_err() {
            let err = MatchmakingError::NegotiationTimeout {
                stage: "gathering candidates".to_string(),
            };
            warn!("{}; publishing the current description", err);
        }

        transport.local_description().unwrap_or(fallback)
    }

    async fn shared_publish(&self, session: &Session, description: SessionDescription) -> Result<()> {
        debug!(
            "Publishing {} for game {}",
            description.sdp_type, session.game_id
        );
        self.signaling
            .publish(session.game_id, &session.requester_id, description)
            .await
    }

    /// Poll fetch-opposing until a fresh description of `wanted` type shows up
    async fn await_remote(
        &self,
        generation: u64,
        session: &Session,
        wanted: SdpType,
    ) -> Result<SessionDescription> {
        for poll in 1..=self.config.max_signal_polls {
            match self
                .signaling
                .fetch_opposing(session.game_id, &session.requester_id)
                .await
            {
                Ok(FetchOutcome::Payload { description, .. }) if description.sdp_type == wanted => {
                    let fresh = self
                        .with_current(generation, |state| {
                            state.consumed.insert(description.sdp.clone())
                        })
                        .ok_or_else(|| MatchmakingError::InternalError {
                            message: "Peer session was cleaned up".to_string(),
                        })?;
                    if fresh {
                        debug!("Received {} after {} polls", wanted, poll);
                        return Ok(description);
                    }
                    debug!("Ignoring stale {} from an earlier attempt", wanted);
                }
                Ok(outcome) => {
                    debug!("Waiting for {}: {}", wanted, outcome.status());
                }
                Err(e) => {
                    warn!("Signaling poll failed: {}", e);
                }
            }

            tokio::time::sleep(self.config.signal_poll_interval).await;
        }

        Err(MatchmakingError::NegotiationTimeout {
            stage: format!("waiting for the remote {}", wanted),
        }
        .into())
    }

    /// Relay messages until the channel is lost
    async fn monitor(&self, mut events: TransportEvents) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(frame) => match PeerMessage::decode(&frame) {
                    Ok(PeerMessage::Move(payload)) => self.emit(PeerEvent::Move(payload)),
                    Ok(PeerMessage::GameControl(control)) => {
                        self.emit(PeerEvent::GameControl(control))
                    }
                    Err(e) => warn!("Dropping unreadable peer frame: {}", e),
                },
                TransportEvent::ChannelClosed => return,
                TransportEvent::StateChanged(state) if state.is_lost() => return,
                _ => {}
            }
        }
    }
}
