use thiserror::Error;

use crate::network::transport::ConnectionId;

/// Errors surfaced synchronously to a caller of `PeerSession::call`.
///
/// Timeouts and dropped connections are not errors: they come back as an
/// absent response.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("only one API call may be in flight at a time")]
    ConcurrentCall,

    #[error("peer is not connected")]
    NotConnected,

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("API call failed: {0}")]
    Call(#[from] CallError),

    #[error("Demo aborted: {0}")]
    Demo(String),
}
