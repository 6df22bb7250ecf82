//! Synchronous, correlated API calls to Remote SDK phones.
//!
//! Phones dial into a WebSocket server and keep the connection open; the
//! control program issues one blocking call at a time per phone and gets
//! back the next non-event message that phone sends. Sessions survive
//! reconnects so callers can hold on to them across a phone reboot.

pub mod config;
pub mod constants;
pub mod demo;
pub mod error;
pub mod network;
pub mod shutdown;

pub use error::{AppError, CallError, MessageError, TransportError};
pub use network::message::{ApiRequest, InboundMessage, MessageKind};
pub use network::peer_session::{CallOutcome, PeerSession};
pub use network::session_registry::SessionRegistry;
pub use network::transport::{ConnectionId, PeerId, Transport, WsTransport};
