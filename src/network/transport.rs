//! The seam between the correlation engine and the byte-level transport.
//!
//! The engine only needs to push a text frame at a connection and, when a
//! peer reconnects, ask for the superseded connection to be closed.

use dashmap::DashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;

/// One physical connection instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Monotonic `ConnectionId` source.
#[derive(Debug, Default)]
pub struct ConnectionIdAllocator {
    next: AtomicU64,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Stable identity of a logical peer across reconnects: the remote IP.
///
/// Not durable across address changes (DHCP renumbering shows up as a new
/// peer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(IpAddr);

impl PeerId {
    pub const fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    /// Drops the port, which changes on every reconnect.
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        Self(addr.ip())
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<IpAddr> for PeerId {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

/// Send primitive consumed by `PeerSession`.
pub trait Transport: Send + Sync {
    /// Best-effort, non-blocking enqueue of one text frame. No delivery
    /// acknowledgment.
    fn send(&self, connection: ConnectionId, text: String) -> Result<(), TransportError>;

    /// Ask the transport to tear down a superseded connection.
    fn close(&self, connection: ConnectionId);
}

/// WebSocket-backed transport: one outbound queue per live connection,
/// drained by that connection's server task.
pub struct WsTransport {
    outbound: DashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            outbound: DashMap::new(),
        }
    }

    /// Called by the server task once the WebSocket handshake completes.
    pub fn register(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound.insert(connection, tx);
        rx
    }

    pub fn unregister(&self, connection: ConnectionId) {
        self.outbound.remove(&connection);
    }

    pub fn active_connections(&self) -> usize {
        self.outbound.len()
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn send(&self, connection: ConnectionId, text: String) -> Result<(), TransportError> {
        let sender = self
            .outbound
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        sender
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::Closed(connection))
    }

    fn close(&self, connection: ConnectionId) {
        if let Some((_, sender)) = self.outbound.remove(&connection) {
            debug!(%connection, "closing superseded connection");
            let _ = sender.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "superseded by reconnect".into(),
            })));
        }
    }
}
