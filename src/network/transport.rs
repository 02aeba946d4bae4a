//! Transport Binding
//!
//! Owns the WebSocket transport independent of role: a listener plus
//! per-peer connection tasks on the authority side, a single connector
//! task on the client side. Socket tasks never touch session state; they
//! bridge the network to the single simulation thread through an
//! unbounded `TransportEvent` channel that the session drains once per
//! tick. Outbound messages travel the other way over per-connection
//! string channels, so sending never blocks the tick.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{ParticipantId, SessionError};

/// Default bind/connect address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Default port.
pub const DEFAULT_PORT: u16 = 7777;

/// First participant id handed to a remote peer; 0 is the authority's own.
const FIRST_REMOTE_ID: u64 = 1;

/// Address and port the transport binds or connects to.
///
/// Immutable once a session is running; `SessionManager::configure`
/// rejects replacement while listening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Host address.
    pub address: String,
    /// TCP port. Port 0 asks the OS for an ephemeral port when listening.
    pub port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl TransportConfig {
    /// `address:port` form used for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// WebSocket URL form used for connecting.
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }
}

/// Events delivered from socket tasks to the simulation thread.
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote peer completed the handshake (authority side).
    PeerConnected(ParticipantId),
    /// A remote peer's connection ended (authority side).
    PeerDisconnected(ParticipantId),
    /// A message arrived from a remote peer (authority side).
    PeerMessage {
        /// Sending peer.
        from: ParticipantId,
        /// Decoded message.
        message: ClientMessage,
    },
    /// A message arrived from the authority (client side).
    AuthorityMessage(ServerMessage),
    /// The connection to the authority ended (client side).
    Closed,
}

type PeerMap = Arc<Mutex<BTreeMap<ParticipantId, mpsc::UnboundedSender<String>>>>;

/// A running transport: listener + peer tasks, or one connector task.
pub struct Transport {
    peers: PeerMap,
    authority_tx: Option<mpsc::UnboundedSender<String>>,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Bind a listener and start accepting peers (host/server roles).
    pub async fn listen(
        config: &TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, SessionError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let local_addr = listener.local_addr().ok();
        info!(address = %config.address, port = config.port, "transport listening");

        let peers: PeerMap = Arc::new(Mutex::new(BTreeMap::new()));
        let accept_task = tokio::spawn(accept_loop(listener, peers.clone(), events));

        Ok(Self {
            peers,
            authority_tx: None,
            local_addr,
            tasks: vec![accept_task],
        })
    }

    /// Connect to a listening authority (client role).
    pub async fn connect(
        config: &TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, SessionError> {
        let (socket, _) = connect_async(config.url()).await?;
        info!(url = %config.url(), "transport connected");

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(authority_task(socket, outgoing_rx, events));

        Ok(Self {
            peers: Arc::new(Mutex::new(BTreeMap::new())),
            authority_tx: Some(outgoing_tx),
            local_addr: None,
            tasks: vec![task],
        })
    }

    /// The bound listener address, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Send to one peer. Missing peers and closed channels drop the
    /// message with a debug log; delivery is fire-and-forget.
    pub fn send_to(&self, peer: ParticipantId, message: &ServerMessage) {
        let Some(json) = encode_server(message) else {
            return;
        };
        if let Ok(peers) = self.peers.lock() {
            match peers.get(&peer) {
                Some(tx) => {
                    let _ = tx.send(json);
                }
                None => debug!(%peer, "no channel for peer; message dropped"),
            }
        }
    }

    /// Send to every connected peer.
    pub fn broadcast(&self, message: &ServerMessage) {
        let Some(json) = encode_server(message) else {
            return;
        };
        if let Ok(peers) = self.peers.lock() {
            for tx in peers.values() {
                let _ = tx.send(json.clone());
            }
        }
    }

    /// Send to the authority (client role).
    pub fn send_to_authority(&self, message: &ClientMessage) {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("failed to encode client message: {e}");
                return;
            }
        };
        match &self.authority_tx {
            Some(tx) => {
                let _ = tx.send(json);
            }
            None => debug!("not connected to an authority; message dropped"),
        }
    }

    /// Tear the transport down: abort the accept/connector tasks and drop
    /// every outbound channel, which ends the per-peer tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Ok(mut peers) = self.peers.lock() {
            peers.clear();
        }
        self.authority_tx = None;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn encode_server(message: &ServerMessage) -> Option<String> {
    match message.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            error!("failed to encode server message: {e}");
            None
        }
    }
}

/// Accept incoming peers, assign participant ids, and hand each
/// connection to its own task.
async fn accept_loop(
    listener: TcpListener,
    peers: PeerMap,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let next_id = AtomicU64::new(FIRST_REMOTE_ID);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept error: {e}");
                continue;
            }
        };

        let socket = match accept_async(stream).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(%addr, "websocket handshake failed: {e}");
                continue;
            }
        };

        let id = ParticipantId::new(next_id.fetch_add(1, Ordering::Relaxed));
        info!(%id, %addr, "peer connected");

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        if let Ok(mut peers) = peers.lock() {
            peers.insert(id, outgoing_tx);
        }

        if events.send(TransportEvent::PeerConnected(id)).is_err() {
            // Session is gone; stop accepting.
            break;
        }

        tokio::spawn(peer_task(id, socket, outgoing_rx, peers.clone(), events.clone()));
    }
}

/// One connected peer: forward inbound messages as events, drain the
/// outbound channel onto the socket.
async fn peer_task(
    id: ParticipantId,
    socket: WebSocketStream<TcpStream>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    peers: PeerMap,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                    Ok(message) => {
                        if events.send(TransportEvent::PeerMessage { from: id, message }).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%id, "unparseable client message: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%id, "websocket read error: {e}");
                    break;
                }
            },
            queued = outgoing.recv() => match queued {
                Some(json) => {
                    if write.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    if let Ok(mut peers) = peers.lock() {
        peers.remove(&id);
    }
    let _ = events.send(TransportEvent::PeerDisconnected(id));
    debug!(%id, "peer task ended");
}

/// The client's single connection to the authority.
async fn authority_task(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                    Ok(message) => {
                        if events.send(TransportEvent::AuthorityMessage(message)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("unparseable server message: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("websocket read error: {e}");
                    break;
                }
            },
            queued = outgoing.recv() => match queued {
                Some(json) => {
                    if write.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = events.send(TransportEvent::Closed);
    debug!("authority connection ended");
}
