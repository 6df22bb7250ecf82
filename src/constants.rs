//! Protocol and daemon defaults.

use std::time::Duration;

/// Port the phones' "Control Server URL" points at by default.
pub const DEFAULT_PORT: u16 = 12345;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Upper bound on how long a single API call waits for its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest accepted `session.call_timeout_secs` (one day).
pub const MAX_CALL_TIMEOUT_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// The bundled demo drives a call between two phones.
pub const DEFAULT_MIN_PEERS: usize = 2;

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wire field names of the Remote SDK envelope.
pub mod wire {
    pub const TYPE_FIELD: &str = "type";
    pub const EVENT_TYPE: &str = "event";
    pub const REQUEST_URI_FIELD: &str = "Request-URI";
}
