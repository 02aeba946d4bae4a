//! Session Management
//!
//! Process-scoped session state: the transport binding, the current role,
//! the local participant, and the roster of connected participants. Role
//! transitions follow a strict state machine
//! (`Unbound -> Host | Server | Client -> Unbound`); changing between
//! active roles requires a shutdown first.
//!
//! All state mutation happens on the simulation thread: socket tasks only
//! enqueue `TransportEvent`s, and `pump()` drains them once per tick.
//! `shutdown()` is a synchronous barrier - it resets state and drops the
//! event channel before returning, so nothing queued can fire afterwards.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::entity::{EntityId, EntityTemplate};
use crate::game::spawn::Replicator;
use crate::network::protocol::{
    ClientMessage, EntitySpawnInfo, EntityStateUpdate, MoveRequest, ServerMessage,
};
use crate::network::transport::{Transport, TransportConfig, TransportEvent};

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Opaque participant identifier, unique per connection for the lifetime
/// of a session.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// The authority side's own reserved id.
    pub const AUTHORITY: Self = Self(0);

    /// Create from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Whether this is the authority's reserved id.
    pub const fn is_authority(self) -> bool {
        self.0 == Self::AUTHORITY.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ROLE
// =============================================================================

/// The mode a process operates in for one session lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Role {
    /// No session active.
    #[default]
    Unbound,
    /// Authority and participant at once.
    Host,
    /// Authority only, no local participant.
    Server,
    /// Non-authority participant.
    Client,
}

impl Role {
    /// Whether this role is permitted to mutate entity state.
    pub fn is_authority(self) -> bool {
        matches!(self, Role::Host | Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Role::Unbound => "Unbound",
            Role::Host => "Host",
            Role::Server => "Server",
            Role::Client => "Client",
        };
        write!(f, "{label}")
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Session errors. All of them are recoverable: the rejected operation
/// leaves session state unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A role transition or configure was attempted while a session is
    /// active.
    #[error("Session is already listening")]
    AlreadyListening,

    /// A role transition was attempted before any transport was
    /// configured.
    #[error("No transport configured")]
    NoTransport,

    /// No entity template resolved for an authority role. Non-fatal: the
    /// session starts without spawn capability.
    #[error("No entity template resolved")]
    MissingEntityTemplate,

    /// Failed to bind the listener.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// WebSocket error while connecting.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

// =============================================================================
// EVENTS
// =============================================================================

/// Connection lifecycle notification delivered to registered handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A participant joined (on a client: the local participant was
    /// welcomed).
    Connected(ParticipantId),
    /// A participant left.
    Disconnected(ParticipantId),
}

/// Typed events produced by one `pump()`, consumed by the spawn binder
/// and the movement path.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A participant connected (authority side).
    ParticipantConnected(ParticipantId),
    /// A participant disconnected (authority side).
    ParticipantDisconnected(ParticipantId),
    /// The authority assigned this process its participant id (client
    /// side).
    Welcomed {
        /// The assigned local participant id.
        participant: ParticipantId,
    },
    /// A participant asked the authority to move an entity.
    MoveRequested {
        /// Requesting participant.
        from: ParticipantId,
        /// The requested delta.
        request: MoveRequest,
    },
    /// An entity exists and should be mirrored (client side).
    EntityReplicated(EntitySpawnInfo),
    /// A mirrored entity was destroyed (client side).
    EntityDespawnReplicated(EntityId),
    /// Authoritative transform state arrived (client side).
    TransformReplicated(EntityStateUpdate),
    /// The connection to the authority is gone (client side).
    ConnectionLost,
}

/// Registered connection callback.
pub type ConnectionHandler = Box<dyn FnMut(ConnectionEvent) + Send>;

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Owns the transport binding, the current role, and the participant
/// roster. One per process; constructed and torn down explicitly.
pub struct SessionManager {
    config: Option<TransportConfig>,
    template: Option<EntityTemplate>,
    role: Role,
    local_participant: Option<ParticipantId>,
    participants: BTreeSet<ParticipantId>,
    handlers: Vec<(String, ConnectionHandler)>,
    transport: Option<Transport>,
    events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    session_id: Option<uuid::Uuid>,
    spawn_template: Option<EntityTemplate>,
}

impl SessionManager {
    /// Create an unbound manager with nothing configured.
    pub fn new() -> Self {
        Self {
            config: None,
            template: None,
            role: Role::Unbound,
            local_participant: None,
            participants: BTreeSet::new(),
            handlers: Vec::new(),
            transport: None,
            events_tx: None,
            events_rx: None,
            session_id: None,
            spawn_template: None,
        }
    }

    /// Establish or replace the transport configuration and the entity
    /// template. Idempotent; rejected while a session is active.
    pub fn configure(
        &mut self,
        config: TransportConfig,
        template: Option<EntityTemplate>,
    ) -> Result<(), SessionError> {
        if self.is_listening() {
            return Err(SessionError::AlreadyListening);
        }
        info!(address = %config.address, port = config.port, "transport configured");
        self.config = Some(config);
        self.template = template;
        Ok(())
    }

    /// Start as host: authority plus a local participant. The host's own
    /// join is delivered through the regular event path on the next pump.
    pub async fn start_host(&mut self) -> Result<(), SessionError> {
        let config = self.ensure_can_start()?.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Transport::listen(&config, events_tx.clone()).await?;

        self.install(transport, events_tx, events_rx, Role::Host);
        self.local_participant = Some(ParticipantId::AUTHORITY);
        self.resolve_spawn_template();
        self.inject(TransportEvent::PeerConnected(ParticipantId::AUTHORITY));
        info!(local = %ParticipantId::AUTHORITY, "session started as host");
        Ok(())
    }

    /// Start as dedicated server: authority only, no local participant.
    pub async fn start_server(&mut self) -> Result<(), SessionError> {
        let config = self.ensure_can_start()?.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Transport::listen(&config, events_tx.clone()).await?;

        self.install(transport, events_tx, events_rx, Role::Server);
        self.resolve_spawn_template();
        info!("session started as server");
        Ok(())
    }

    /// Start as client: connect to the configured authority. The local
    /// participant id arrives with the welcome message.
    pub async fn start_client(&mut self) -> Result<(), SessionError> {
        let config = self.ensure_can_start()?.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Transport::connect(&config, events_tx.clone()).await?;

        self.install(transport, events_tx, events_rx, Role::Client);
        self.send_to_authority(&ClientMessage::Hello {
            version: crate::VERSION.to_string(),
        });
        info!(url = %config.url(), "session started as client");
        Ok(())
    }

    /// Tear the session down and return to `Unbound`. Safe to call when
    /// already unbound.
    ///
    /// This is a barrier: state is reset and the event channel dropped
    /// before returning, so no handler can fire afterwards and no queued
    /// event survives.
    pub fn shutdown(&mut self) {
        if self.role == Role::Unbound {
            debug!("shutdown with no active session");
            return;
        }

        if self.role.is_authority() {
            self.broadcast(&ServerMessage::Shutdown {
                reason: "session closed".to_string(),
            });
        } else {
            self.send_to_authority(&ClientMessage::Goodbye);
        }

        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        self.events_tx = None;
        self.events_rx = None;
        self.participants.clear();
        self.local_participant = None;
        self.handlers.clear();
        self.spawn_template = None;
        self.session_id = None;

        let previous = self.role;
        self.role = Role::Unbound;
        info!(from = %previous, "session shut down");
    }

    /// Register a connection handler under a caller-chosen key.
    ///
    /// Registration is idempotent: re-registering the same key replaces
    /// the handler instead of adding a duplicate invocation.
    pub fn register_connection_handler<F>(&mut self, key: impl Into<String>, handler: F)
    where
        F: FnMut(ConnectionEvent) + Send + 'static,
    {
        let key = key.into();
        let boxed: ConnectionHandler = Box::new(handler);
        if let Some(slot) = self.handlers.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = boxed;
        } else {
            self.handlers.push((key, boxed));
        }
    }

    /// Remove a registered handler. Returns whether it existed.
    pub fn unregister_connection_handler(&mut self, key: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(k, _)| k != key);
        self.handlers.len() != before
    }

    /// Drain the transport event queue, update the roster, and dispatch
    /// connection handlers. Called once per simulation tick; returns the
    /// tick's session events for downstream consumers.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        let Some(mut events_rx) = self.events_rx.take() else {
            return out;
        };

        while let Ok(event) = events_rx.try_recv() {
            self.handle_transport_event(event, &mut out);
        }
        self.events_rx = Some(events_rx);

        for event in &out {
            let notification = match event {
                SessionEvent::ParticipantConnected(id) => Some(ConnectionEvent::Connected(*id)),
                SessionEvent::ParticipantDisconnected(id) => {
                    Some(ConnectionEvent::Disconnected(*id))
                }
                SessionEvent::Welcomed { participant } => {
                    Some(ConnectionEvent::Connected(*participant))
                }
                _ => None,
            };
            if let Some(notification) = notification {
                for (_, handler) in self.handlers.iter_mut() {
                    handler(notification);
                }
            }
        }

        out
    }

    /// Route a move request from the locally owned entity toward the
    /// authority. On a host this feeds the local event queue directly; on
    /// a client it goes over the wire. Fire-and-forget either way.
    pub fn send_move(&self, request: MoveRequest) {
        match self.role {
            Role::Client => self.send_to_authority(&ClientMessage::Move(request)),
            Role::Host => {
                if let (Some(events_tx), Some(local)) = (&self.events_tx, self.local_participant) {
                    let _ = events_tx.send(TransportEvent::PeerMessage {
                        from: local,
                        message: ClientMessage::Move(request),
                    });
                }
            }
            Role::Server | Role::Unbound => {
                debug!("no local participant to move; request dropped")
            }
        }
    }

    /// Send to every connected peer. Best-effort; without a transport the
    /// message is dropped with a debug log.
    pub fn broadcast(&self, message: &ServerMessage) {
        match &self.transport {
            Some(transport) => transport.broadcast(message),
            None => debug!("no transport; broadcast dropped"),
        }
    }

    /// Send to a single peer. Best-effort.
    pub fn send_to(&self, peer: ParticipantId, message: &ServerMessage) {
        match &self.transport {
            Some(transport) => transport.send_to(peer, message),
            None => debug!(%peer, "no transport; message dropped"),
        }
    }

    fn send_to_authority(&self, message: &ClientMessage) {
        match &self.transport {
            Some(transport) => transport.send_to_authority(message),
            None => debug!("no transport; message dropped"),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether a session is active. Always equals `role != Unbound`.
    pub fn is_listening(&self) -> bool {
        self.role != Role::Unbound
    }

    /// The local participant id: the authority id on a host, the welcomed
    /// id on a client, `None` on a server or when unbound.
    pub fn local_participant(&self) -> Option<ParticipantId> {
        self.local_participant
    }

    /// The connected participant roster.
    pub fn participants(&self) -> &BTreeSet<ParticipantId> {
        &self.participants
    }

    /// Number of connected participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// The template entities spawn from, when the session has spawn
    /// capability.
    pub fn spawn_template(&self) -> Option<&EntityTemplate> {
        self.spawn_template.as_ref()
    }

    /// The active session instance id.
    pub fn session_id(&self) -> Option<uuid::Uuid> {
        self.session_id
    }

    /// The bound listener port, when listening. Useful with port 0.
    pub fn local_port(&self) -> Option<u16> {
        self.transport
            .as_ref()
            .and_then(|t| t.local_addr())
            .map(|addr| addr.port())
    }

    /// Sender half of the transport event queue. Used by scripted drivers
    /// that stand in for the transport.
    pub fn event_sender(&self) -> Option<mpsc::UnboundedSender<TransportEvent>> {
        self.events_tx.clone()
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn ensure_can_start(&self) -> Result<&TransportConfig, SessionError> {
        if self.role != Role::Unbound {
            return Err(SessionError::AlreadyListening);
        }
        self.config.as_ref().ok_or(SessionError::NoTransport)
    }

    fn install(
        &mut self,
        transport: Transport,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        events_rx: mpsc::UnboundedReceiver<TransportEvent>,
        role: Role,
    ) {
        self.transport = Some(transport);
        self.events_tx = Some(events_tx);
        self.events_rx = Some(events_rx);
        self.session_id = Some(uuid::Uuid::new_v4());
        self.role = role;
    }

    /// Resolve the spawn template for an authority role. Missing template
    /// degrades to a spawn-incapable session instead of failing the start.
    fn resolve_spawn_template(&mut self) {
        match self
            .template
            .clone()
            .ok_or(SessionError::MissingEntityTemplate)
        {
            Ok(template) => self.spawn_template = Some(template),
            Err(e) => {
                warn!("{e}; continuing without spawn capability");
                self.spawn_template = None;
            }
        }
    }

    fn inject(&self, event: TransportEvent) {
        if let Some(events_tx) = &self.events_tx {
            let _ = events_tx.send(event);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent, out: &mut Vec<SessionEvent>) {
        match event {
            TransportEvent::PeerConnected(id) => {
                if !self.role.is_authority() {
                    warn!(%id, "peer connection event outside an authority role ignored");
                    return;
                }
                self.participants.insert(id);
                let session = self
                    .session_id
                    .map(|uuid| uuid.to_string())
                    .unwrap_or_default();
                self.send_to(id, &ServerMessage::Welcome {
                    participant: id,
                    session,
                });
                out.push(SessionEvent::ParticipantConnected(id));
            }
            TransportEvent::PeerDisconnected(id) => {
                if !self.participants.remove(&id) {
                    debug!(%id, "disconnect for unknown participant");
                }
                out.push(SessionEvent::ParticipantDisconnected(id));
            }
            TransportEvent::PeerMessage { from, message } => match message {
                ClientMessage::Hello { version } => {
                    debug!(%from, %version, "peer hello");
                }
                ClientMessage::Move(request) => {
                    out.push(SessionEvent::MoveRequested { from, request });
                }
                ClientMessage::Goodbye => {
                    debug!(%from, "peer goodbye");
                }
            },
            TransportEvent::AuthorityMessage(message) => match message {
                ServerMessage::Welcome {
                    participant,
                    session,
                } => {
                    info!(%participant, %session, "welcomed into session");
                    self.local_participant = Some(participant);
                    self.participants.insert(participant);
                    out.push(SessionEvent::Welcomed { participant });
                }
                ServerMessage::EntitySpawned(info) => {
                    out.push(SessionEvent::EntityReplicated(info));
                }
                ServerMessage::EntityDespawned { entity } => {
                    out.push(SessionEvent::EntityDespawnReplicated(entity));
                }
                ServerMessage::EntityState(update) => {
                    out.push(SessionEvent::TransformReplicated(update));
                }
                ServerMessage::Shutdown { reason } => {
                    warn!(%reason, "authority shut the session down");
                    out.push(SessionEvent::ConnectionLost);
                }
            },
            TransportEvent::Closed => {
                warn!("connection to the authority lost");
                out.push(SessionEvent::ConnectionLost);
            }
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Replicator for SessionManager {
    fn broadcast(&self, message: &ServerMessage) {
        SessionManager::broadcast(self, message);
    }

    fn send_to(&self, peer: ParticipantId, message: &ServerMessage) {
        SessionManager::send_to(self, peer, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec::Vec3;
    use crate::game::entity::ColorHint;
    use crate::game::input::{IntentFrame, KeyIntent};
    use crate::game::spawn::SpawnBinder;
    use crate::game::tick::tick;
    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const DT: f32 = 0.1;

    fn loopback_config() -> TransportConfig {
        // Port 0 takes an ephemeral port so parallel tests never collide.
        TransportConfig {
            address: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    fn configured() -> SessionManager {
        let mut session = SessionManager::new();
        session
            .configure(loopback_config(), Some(EntityTemplate::default()))
            .unwrap();
        session
    }

    fn up_intent() -> IntentFrame {
        IntentFrame::from_keys(KeyIntent {
            up: true,
            ..KeyIntent::none()
        })
    }

    #[tokio::test]
    async fn test_start_without_transport_fails() {
        let mut session = SessionManager::new();
        assert!(matches!(
            session.start_host().await,
            Err(SessionError::NoTransport)
        ));
        assert_eq!(session.role(), Role::Unbound);
        assert!(!session.is_listening());
    }

    #[tokio::test]
    async fn test_start_host_sets_role_and_joins_local_participant() {
        let mut session = configured();
        session.start_host().await.unwrap();

        assert_eq!(session.role(), Role::Host);
        assert!(session.is_listening());
        assert_eq!(session.local_participant(), Some(ParticipantId::AUTHORITY));
        assert!(session.session_id().is_some());

        let events = session.pump();
        assert!(matches!(
            events.first(),
            Some(SessionEvent::ParticipantConnected(id)) if id.is_authority()
        ));
        assert!(session.participants().contains(&ParticipantId::AUTHORITY));

        session.shutdown();
    }

    #[tokio::test]
    async fn test_second_start_fails_and_leaves_state_unchanged() {
        let mut session = configured();
        session.start_host().await.unwrap();
        session.pump();
        let participants_before = session.participants().clone();

        assert!(matches!(
            session.start_host().await,
            Err(SessionError::AlreadyListening)
        ));
        // No direct role-to-role transitions either.
        assert!(matches!(
            session.start_client().await,
            Err(SessionError::AlreadyListening)
        ));

        assert_eq!(session.role(), Role::Host);
        assert_eq!(session.participants(), &participants_before);
        assert_eq!(session.local_participant(), Some(ParticipantId::AUTHORITY));

        session.shutdown();
    }

    #[tokio::test]
    async fn test_configure_rejected_while_listening() {
        let mut session = configured();
        session.start_server().await.unwrap();

        assert!(matches!(
            session.configure(loopback_config(), None),
            Err(SessionError::AlreadyListening)
        ));

        session.shutdown();
        // Unbound again: configure succeeds.
        session.configure(loopback_config(), None).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_resets_state_and_is_idempotent() {
        let mut session = configured();
        session.start_host().await.unwrap();
        session.pump();

        session.shutdown();
        assert_eq!(session.role(), Role::Unbound);
        assert!(!session.is_listening());
        assert!(session.participants().is_empty());
        assert!(session.local_participant().is_none());
        assert!(session.session_id().is_none());

        // Safe to call when already unbound.
        session.shutdown();
        assert_eq!(session.role(), Role::Unbound);
    }

    #[tokio::test]
    async fn test_server_role_has_no_local_participant() {
        let mut session = configured();
        session.start_server().await.unwrap();

        assert_eq!(session.role(), Role::Server);
        assert!(session.local_participant().is_none());
        assert!(session.pump().is_empty());

        session.shutdown();
    }

    #[tokio::test]
    async fn test_handler_registration_is_idempotent() {
        let mut session = configured();
        let count = Arc::new(AtomicUsize::new(0));

        let first = count.clone();
        session.register_connection_handler("counter", move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        });
        // Same identity registered again: replaced, not duplicated.
        let second = count.clone();
        session.register_connection_handler("counter", move |_| {
            second.fetch_add(1, Ordering::SeqCst);
        });

        session.start_host().await.unwrap();
        session.pump();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        session.shutdown();
    }

    #[tokio::test]
    async fn test_no_handler_fires_after_shutdown() {
        let mut session = configured();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        session.register_connection_handler("counter", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.start_host().await.unwrap();
        session.pump();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // An event queued but not yet pumped must die with the barrier.
        let sender = session.event_sender().unwrap();
        sender
            .send(TransportEvent::PeerConnected(ParticipantId::new(7)))
            .unwrap();
        session.shutdown();

        assert!(session.pump().is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_handler_stops_firing() {
        let mut session = configured();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        session.register_connection_handler("counter", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(session.unregister_connection_handler("counter"));
        assert!(!session.unregister_connection_handler("counter"));

        session.start_host().await.unwrap();
        session.pump();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        session.shutdown();
    }

    #[tokio::test]
    async fn test_missing_template_degrades_to_spawnless_session() {
        let mut session = SessionManager::new();
        session.configure(loopback_config(), None).unwrap();
        session.start_host().await.unwrap();
        assert!(session.spawn_template().is_none());

        // The host participant joins, but no entity can spawn.
        let mut binder = SpawnBinder::new();
        let result = tick(&mut session, &mut binder, &IntentFrame::idle(), DT);
        assert_eq!(result.events.len(), 1);
        assert!(binder.is_empty());

        session.shutdown();
    }

    #[tokio::test]
    async fn test_host_spawns_and_moves_through_full_path() {
        let mut session = configured();
        session.start_host().await.unwrap();
        let mut binder = SpawnBinder::new();

        // Tick 1: the host's own join spawns its entity.
        tick(&mut session, &mut binder, &IntentFrame::idle(), DT);
        assert_eq!(binder.len(), 1);

        // A remote participant joins through the same event path.
        let sender = session.event_sender().unwrap();
        sender
            .send(TransportEvent::PeerConnected(ParticipantId::new(7)))
            .unwrap();
        tick(&mut session, &mut binder, &IntentFrame::idle(), DT);
        assert_eq!(binder.len(), 2);
        let remote = binder.entity_owned_by(ParticipantId::new(7)).unwrap();
        assert_eq!(remote.owner, ParticipantId::new(7));
        assert_eq!(remote.color, ColorHint::NON_AUTHORITY);

        // A duplicated connection event must not spawn a second entity.
        sender
            .send(TransportEvent::PeerConnected(ParticipantId::new(7)))
            .unwrap();
        tick(&mut session, &mut binder, &IntentFrame::idle(), DT);
        assert_eq!(binder.len(), 2);

        // One step of intent (0, 1): sampled this tick, applied the next.
        tick(&mut session, &mut binder, &up_intent(), DT);
        let result = tick(&mut session, &mut binder, &IntentFrame::idle(), DT);
        assert_eq!(result.moved.len(), 1);

        let entity = binder.entity_owned_by(ParticipantId::AUTHORITY).unwrap();
        assert_eq!(entity.color, ColorHint::AUTHORITY);
        assert!(entity.transform.position.approx_eq(Vec3::new(0.0, 0.0, 0.3)));
        assert_eq!(entity.transform.position.x, 0.0);

        session.shutdown();
    }

    #[tokio::test]
    async fn test_client_joins_and_moves_over_network() {
        let mut host = configured();
        host.start_host().await.unwrap();
        let mut host_binder = SpawnBinder::new();
        tick(&mut host, &mut host_binder, &IntentFrame::idle(), DT);
        let port = host.local_port().unwrap();

        let mut client = SessionManager::new();
        client
            .configure(
                TransportConfig {
                    address: "127.0.0.1".to_string(),
                    port,
                },
                None,
            )
            .unwrap();
        client.start_client().await.unwrap();
        let mut client_binder = SpawnBinder::new();

        // Drive both sides until the client is welcomed and mirrors both
        // entities.
        for _ in 0..200 {
            tick(&mut host, &mut host_binder, &IntentFrame::idle(), DT);
            tick(&mut client, &mut client_binder, &IntentFrame::idle(), DT);
            if client.local_participant().is_some() && client_binder.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let local = client.local_participant().expect("client never welcomed");
        assert_eq!(local, ParticipantId::new(1));
        assert_eq!(host_binder.len(), 2);
        assert_eq!(client_binder.len(), 2);

        let host_entity = client_binder.entity_owned_by(ParticipantId::AUTHORITY).unwrap();
        assert_eq!(host_entity.color, ColorHint::AUTHORITY);
        let own = client_binder.entity_owned_by(local).unwrap();
        assert_eq!(own.color, ColorHint::NON_AUTHORITY);
        assert!(!own.authority_instance);
        let own_id = own.id;

        // One step of client intent; the authority applies it and
        // replicates the transform back.
        tick(&mut client, &mut client_binder, &up_intent(), DT);

        let expected = Vec3::new(0.0, 0.0, 0.3);
        let mut replicated = false;
        for _ in 0..200 {
            tick(&mut host, &mut host_binder, &IntentFrame::idle(), DT);
            tick(&mut client, &mut client_binder, &IntentFrame::idle(), DT);
            let mirrored = client_binder.entity(own_id).unwrap().transform.position;
            if mirrored.approx_eq(expected) {
                replicated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(replicated, "authority state never replicated back");
        assert!(host_binder
            .entity(own_id)
            .unwrap()
            .transform
            .position
            .approx_eq(expected));

        client.shutdown();
        host.shutdown();
    }

    #[tokio::test]
    async fn test_client_start_against_dead_port_fails_clean() {
        let mut session = SessionManager::new();
        session
            .configure(
                TransportConfig {
                    address: "127.0.0.1".to_string(),
                    port: 1,
                },
                None,
            )
            .unwrap();

        assert!(session.start_client().await.is_err());
        assert_eq!(session.role(), Role::Unbound);
        assert!(!session.is_listening());
    }

    #[derive(Clone, Copy, Debug)]
    enum Command {
        Configure,
        StartHost,
        StartServer,
        Shutdown,
        Pump,
    }

    fn command_strategy() -> impl Strategy<Value = Command> {
        prop_oneof![
            Just(Command::Configure),
            Just(Command::StartHost),
            Just(Command::StartServer),
            Just(Command::Shutdown),
            Just(Command::Pump),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

        /// Arbitrary role-transition sequences keep the state machine
        /// invariants: listening equals bound, rejected transitions leave
        /// state untouched, shutdown always lands in a clean Unbound.
        #[test]
        fn prop_role_transitions_hold_invariants(
            commands in proptest::collection::vec(command_strategy(), 1..16)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            runtime.block_on(async {
                let mut session = SessionManager::new();

                for command in commands {
                    let role_before = session.role();
                    let participants_before = session.participant_count();

                    match command {
                        Command::Configure => {
                            let result = session
                                .configure(loopback_config(), Some(EntityTemplate::default()));
                            if role_before == Role::Unbound {
                                prop_assert!(result.is_ok());
                            } else {
                                prop_assert!(matches!(result, Err(SessionError::AlreadyListening)));
                            }
                        }
                        Command::StartHost => match session.start_host().await {
                            Ok(()) => {
                                prop_assert_eq!(role_before, Role::Unbound);
                                prop_assert_eq!(session.role(), Role::Host);
                                prop_assert_eq!(
                                    session.local_participant(),
                                    Some(ParticipantId::AUTHORITY)
                                );
                            }
                            Err(SessionError::AlreadyListening) => {
                                prop_assert_ne!(role_before, Role::Unbound);
                                prop_assert_eq!(session.role(), role_before);
                                prop_assert_eq!(
                                    session.participant_count(),
                                    participants_before
                                );
                            }
                            Err(SessionError::NoTransport) => {
                                prop_assert_eq!(session.role(), Role::Unbound);
                            }
                            Err(e) => prop_assert!(false, "unexpected error: {e}"),
                        },
                        Command::StartServer => match session.start_server().await {
                            Ok(()) => {
                                prop_assert_eq!(role_before, Role::Unbound);
                                prop_assert_eq!(session.role(), Role::Server);
                                prop_assert!(session.local_participant().is_none());
                            }
                            Err(SessionError::AlreadyListening) => {
                                prop_assert_ne!(role_before, Role::Unbound);
                                prop_assert_eq!(session.role(), role_before);
                            }
                            Err(SessionError::NoTransport) => {
                                prop_assert_eq!(session.role(), Role::Unbound);
                            }
                            Err(e) => prop_assert!(false, "unexpected error: {e}"),
                        },
                        Command::Shutdown => {
                            session.shutdown();
                            prop_assert_eq!(session.role(), Role::Unbound);
                            prop_assert!(session.participants().is_empty());
                            prop_assert!(session.local_participant().is_none());
                        }
                        Command::Pump => {
                            session.pump();
                        }
                    }

                    // Structural invariants hold after every step.
                    prop_assert_eq!(session.is_listening(), session.role() != Role::Unbound);
                    if !session.is_listening() {
                        prop_assert!(session.participants().is_empty());
                    }
                }

                session.shutdown();
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
