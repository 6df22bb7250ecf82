//! Call/response correlation for one logical peer.
//!
//! The Remote SDK protocol has no request ids, so correlation is "the next
//! response after my request is mine". That only holds with at most one call
//! in flight per peer, which `call` enforces.
//!
//! A session outlives its connections: a reconnect swaps the handle in place
//! so orchestration code can keep holding the same `Arc<PeerSession>` across
//! a phone reboot or a network blip.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::message::{InboundMessage, MessageKind};
use super::transport::{ConnectionId, PeerId, Transport};
use crate::error::{CallError, MessageError};

/// How a call's wait ended.
///
/// `call` collapses everything except `Response` into `None`; callers that
/// care about the reason use `call_with_outcome`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Response(Value),
    TimedOut,
    /// The connection the request went out on was lost.
    Disconnected,
    /// The peer reconnected on a new connection while we were waiting.
    Superseded,
}

impl CallOutcome {
    pub fn into_response(self) -> Option<Value> {
        match self {
            CallOutcome::Response(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, CallOutcome::Response(_))
    }
}

struct SessionState {
    connection: Option<ConnectionId>,
    pending: bool,
    last_response: Option<Value>,
    /// Single-slot wakeup. Only filled while `pending`; the first release
    /// wins and later ones are no-ops until the waiter drains it.
    wakeup: Option<CallOutcome>,
}

impl SessionState {
    fn release(&mut self, outcome: CallOutcome) -> bool {
        if self.pending && self.wakeup.is_none() {
            self.wakeup = Some(outcome);
            true
        } else {
            false
        }
    }
}

pub struct PeerSession {
    identity: PeerId,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
    state: Mutex<SessionState>,
    released: Condvar,
}

impl PeerSession {
    /// A session is born attached: it only exists once a peer has connected.
    pub fn new(
        identity: PeerId,
        connection: ConnectionId,
        transport: Arc<dyn Transport>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            transport,
            call_timeout,
            state: Mutex::new(SessionState {
                connection: Some(connection),
                pending: false,
                last_response: None,
                wakeup: None,
            }),
            released: Condvar::new(),
        }
    }

    pub fn identity(&self) -> PeerId {
        self.identity
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    pub fn is_current(&self, connection: ConnectionId) -> bool {
        self.state.lock().connection == Some(connection)
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    /// Most recent response seen on this session, correlated or not.
    pub fn last_response(&self) -> Option<Value> {
        self.state.lock().last_response.clone()
    }

    /// Send `payload` and block the calling thread until its response
    /// arrives, the call times out, or the connection drops or is replaced.
    ///
    /// `Ok(None)` covers all three failure outcomes alike; treat it as
    /// "unknown" and retry at the application level.
    pub fn call<P>(&self, payload: &P) -> Result<Option<Value>, CallError>
    where
        P: Serialize + ?Sized,
    {
        self.call_with_outcome(payload)
            .map(CallOutcome::into_response)
    }

    /// Like `call`, but reports why a wait ended without a response.
    pub fn call_with_outcome<P>(&self, payload: &P) -> Result<CallOutcome, CallError>
    where
        P: Serialize + ?Sized,
    {
        let text = serde_json::to_string(payload)?;

        let connection = {
            let mut state = self.state.lock();
            if state.pending {
                return Err(CallError::ConcurrentCall);
            }
            let connection = state.connection.ok_or(CallError::NotConnected)?;
            state.pending = true;
            state.wakeup = None;
            state.last_response = None;
            connection
        };

        debug!(peer = %self.identity, %connection, request = %text, "Sending request");

        if let Err(e) = self.transport.send(connection, text) {
            let mut state = self.state.lock();
            state.pending = false;
            state.wakeup = None;
            warn!(peer = %self.identity, %connection, "Send failed: {}", e);
            return Err(e.into());
        }

        // A timeout too large to land on the clock waits for a release.
        let deadline = Instant::now().checked_add(self.call_timeout);
        let mut state = self.state.lock();
        while state.wakeup.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.released.wait(&mut state),
            }
        }
        state.pending = false;
        let outcome = state.wakeup.take().unwrap_or(CallOutcome::TimedOut);
        drop(state);

        match &outcome {
            CallOutcome::Response(_) => {}
            CallOutcome::TimedOut => warn!(
                peer = %self.identity,
                timeout_secs = self.call_timeout.as_secs_f64(),
                "⏱️ No response before timeout"
            ),
            CallOutcome::Disconnected | CallOutcome::Superseded => debug!(
                peer = %self.identity,
                ?outcome,
                "Call released without a response"
            ),
        }

        Ok(outcome)
    }

    /// Handle one inbound frame. Events are discarded; everything else is
    /// recorded as the latest response and handed to the waiting caller, if
    /// there is one.
    pub fn on_message(&self, raw: &str) -> Result<MessageKind, MessageError> {
        let message = InboundMessage::parse(raw)?;

        if message.is_event() {
            debug!(peer = %self.identity, event = %message.payload, "Ignoring event");
            return Ok(MessageKind::Event);
        }

        debug!(peer = %self.identity, response = %message.payload, "Received response");

        let mut state = self.state.lock();
        state.last_response = Some(message.payload.clone());
        if state.release(CallOutcome::Response(message.payload)) {
            self.released.notify_one();
        }
        Ok(MessageKind::Response)
    }

    /// Attach a new connection, forcibly releasing any caller still waiting
    /// on the old one. Returns the replaced connection, if any.
    pub fn on_reconnect(&self, connection: ConnectionId) -> Option<ConnectionId> {
        let mut state = self.state.lock();
        let previous = state.connection.replace(connection);
        state.last_response = None;
        if state.release(CallOutcome::Superseded) {
            self.released.notify_one();
        }
        drop(state);

        info!(
            peer = %self.identity,
            %connection,
            previous = ?previous,
            "🔄 Peer reconnected"
        );
        previous.filter(|prev| *prev != connection)
    }

    /// Detach `connection` if it is still the current one. A disconnect for
    /// a connection that has already been replaced is ignored.
    ///
    /// Returns whether the disconnect was applied.
    pub fn on_disconnect(&self, connection: ConnectionId) -> bool {
        let mut state = self.state.lock();
        if state.connection != Some(connection) {
            debug!(
                peer = %self.identity,
                %connection,
                current = ?state.connection,
                "Ignoring disconnect for superseded connection"
            );
            return false;
        }
        state.connection = None;
        if state.release(CallOutcome::Disconnected) {
            self.released.notify_one();
        }
        true
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PeerSession")
            .field("identity", &self.identity)
            .field("connection", &state.connection)
            .field("pending", &state.pending)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::network::message::ApiRequest;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use std::thread;

    /// Records every frame instead of sending it.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<(ConnectionId, String)>>,
        pub closed: Mutex<Vec<ConnectionId>>,
        pub refuse: Mutex<bool>,
    }

    impl RecordingTransport {
        pub fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }

        pub fn last_sent(&self) -> Option<(ConnectionId, String)> {
            self.sent.lock().last().cloned()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, connection: ConnectionId, text: String) -> Result<(), TransportError> {
            if *self.refuse.lock() {
                return Err(TransportError::Closed(connection));
            }
            self.sent.lock().push((connection, text));
            Ok(())
        }

        fn close(&self, connection: ConnectionId) {
            self.closed.lock().push(connection);
        }
    }

    /// Poll `cond` for up to two seconds.
    pub(crate) fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn peer() -> PeerId {
        PeerId::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
    }

    const C1: ConnectionId = ConnectionId::new(1);
    const C2: ConnectionId = ConnectionId::new(2);

    fn session(timeout: Duration) -> (Arc<PeerSession>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let session = Arc::new(PeerSession::new(peer(), C1, transport.clone(), timeout));
        (session, transport)
    }

    fn spawn_call(
        session: &Arc<PeerSession>,
    ) -> thread::JoinHandle<Result<CallOutcome, CallError>> {
        let session = session.clone();
        thread::spawn(move || session.call_with_outcome(&ApiRequest::status_file()))
    }

    #[test]
    fn test_call_returns_correlated_response() {
        let (session, transport) = session(Duration::from_secs(5));
        let handle = spawn_call(&session);

        assert!(wait_until(|| transport.sent_count() == 1));
        let (conn, text) = transport.last_sent().unwrap();
        assert_eq!(conn, C1);
        assert!(text.contains("/api/Serviceability/v1/GetStatusFile"));

        session
            .on_message(r#"{"type":"response","result":{"status":"ok"}}"#)
            .unwrap();

        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(
            outcome,
            CallOutcome::Response(json!({"type":"response","result":{"status":"ok"}}))
        );
        assert!(!session.is_pending());
    }

    #[test]
    fn test_unbounded_timeout_still_returns_response() {
        let (session, transport) = session(Duration::MAX);
        let handle = spawn_call(&session);

        assert!(wait_until(|| transport.sent_count() == 1));
        session.on_message(r#"{"type":"response","ok":true}"#).unwrap();

        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome, CallOutcome::Response(json!({"type":"response","ok":true})));
        assert!(!session.is_pending());
    }

    #[test]
    fn test_event_does_not_complete_call() {
        let (session, transport) = session(Duration::from_secs(5));
        let handle = spawn_call(&session);
        assert!(wait_until(|| transport.sent_count() == 1));

        let kind = session
            .on_message(r#"{"type":"event","event":"LineStateChanged"}"#)
            .unwrap();
        assert_eq!(kind, MessageKind::Event);
        thread::sleep(Duration::from_millis(50));
        assert!(session.is_pending());
        assert!(!handle.is_finished());

        session
            .on_message(r#"{"type":"response","result":{"x":1}}"#)
            .unwrap();
        let response = handle.join().unwrap().unwrap().into_response().unwrap();
        assert_eq!(response["result"]["x"], json!(1));
    }

    #[test]
    fn test_call_without_connection_fails_before_sending() {
        let (session, transport) = session(Duration::from_secs(5));
        assert!(session.on_disconnect(C1));

        let err = session.call(&ApiRequest::status_file()).unwrap_err();
        assert!(matches!(err, CallError::NotConnected));
        assert_eq!(transport.sent_count(), 0);
        assert!(!session.is_pending());
    }

    #[test]
    fn test_second_call_while_pending_is_rejected() {
        let (session, transport) = session(Duration::from_secs(5));
        let handle = spawn_call(&session);
        assert!(wait_until(|| session.is_pending()));

        let err = session.call(&ApiRequest::status_file()).unwrap_err();
        assert!(matches!(err, CallError::ConcurrentCall));

        // The first call is untouched by the rejected one.
        assert!(wait_until(|| transport.sent_count() == 1));
        session.on_message(r#"{"type":"response"}"#).unwrap();
        assert!(handle.join().unwrap().unwrap().is_response());
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_timeout_clears_pending() {
        let (session, transport) = session(Duration::from_millis(100));
        let outcome = session
            .call_with_outcome(&ApiRequest::status_file())
            .unwrap();
        assert_eq!(outcome, CallOutcome::TimedOut);
        assert!(!session.is_pending());

        // A later call still goes through.
        let handle = spawn_call(&session);
        assert!(wait_until(|| transport.sent_count() == 2));
        session.on_message(r#"{"type":"response"}"#).unwrap();
        assert!(handle.join().unwrap().unwrap().is_response());
    }

    #[test]
    fn test_disconnect_releases_waiter_early() {
        let (session, transport) = session(Duration::from_secs(60));
        let started = Instant::now();
        let handle = spawn_call(&session);
        assert!(wait_until(|| transport.sent_count() == 1));

        assert!(session.on_disconnect(C1));
        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome, CallOutcome::Disconnected);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!session.is_pending());
        assert!(!session.is_connected());
    }

    #[test]
    fn test_reconnect_releases_waiter_and_next_call_uses_new_connection() {
        let (session, transport) = session(Duration::from_secs(60));
        let handle = spawn_call(&session);
        assert!(wait_until(|| transport.sent_count() == 1));

        assert_eq!(session.on_reconnect(C2), Some(C1));
        assert_eq!(handle.join().unwrap().unwrap(), CallOutcome::Superseded);
        assert!(!session.is_pending());

        let handle = spawn_call(&session);
        assert!(wait_until(|| transport.sent_count() == 2));
        assert_eq!(transport.last_sent().unwrap().0, C2);
        session.on_message(r#"{"type":"response","n":2}"#).unwrap();
        let response = handle.join().unwrap().unwrap().into_response().unwrap();
        assert_eq!(response["n"], json!(2));
    }

    #[test]
    fn test_stale_disconnect_after_reconnect_is_ignored() {
        let (session, _transport) = session(Duration::from_secs(5));
        session.on_reconnect(C2);

        assert!(!session.on_disconnect(C1));
        assert_eq!(session.connection(), Some(C2));
        assert!(session.is_current(C2));
        assert!(!session.is_current(C1));
    }

    #[test]
    fn test_idle_response_is_not_observed_by_next_call() {
        let (session, transport) = session(Duration::from_millis(100));
        session
            .on_message(r#"{"type":"response","stale":true}"#)
            .unwrap();
        assert_eq!(
            session.last_response(),
            Some(json!({"type":"response","stale":true}))
        );
        assert!(!session.is_pending());

        let outcome = session
            .call_with_outcome(&ApiRequest::status_file())
            .unwrap();
        assert_eq!(outcome, CallOutcome::TimedOut);
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_failed_send_restores_idle_state() {
        let (session, transport) = session(Duration::from_secs(5));
        *transport.refuse.lock() = true;

        let err = session.call(&ApiRequest::status_file()).unwrap_err();
        assert!(matches!(err, CallError::Transport(TransportError::Closed(c)) if c == C1));
        assert!(!session.is_pending());
    }

    #[test]
    fn test_malformed_message_leaves_call_pending() {
        let (session, transport) = session(Duration::from_secs(5));
        let handle = spawn_call(&session);
        assert!(wait_until(|| transport.sent_count() == 1));

        assert!(session.on_message("{truncated").is_err());
        thread::sleep(Duration::from_millis(50));
        assert!(session.is_pending());

        session.on_message(r#"{"type":"response"}"#).unwrap();
        assert!(handle.join().unwrap().unwrap().is_response());
    }

    #[test]
    fn test_reconnect_clears_last_response() {
        let (session, _transport) = session(Duration::from_secs(5));
        session.on_message(r#"{"type":"response"}"#).unwrap();
        assert!(session.last_response().is_some());

        session.on_reconnect(C2);
        assert!(session.last_response().is_none());
    }
}
