pub mod message;
pub mod peer_session;
pub mod server;
pub mod session_registry;
pub mod transport;
