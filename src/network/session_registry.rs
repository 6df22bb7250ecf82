use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::peer_session::PeerSession;
use super::transport::{ConnectionId, PeerId, Transport};

/// Registry of peer sessions keyed by stable peer identity.
///
/// Sessions are created on first contact and never removed; a reconnect is
/// folded into the existing session. Every connect pulses a population
/// signal that orchestration code can block on.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<PeerId, Arc<PeerSession>>>,
    /// Pulsed on every connect. Waiters re-check the map size themselves.
    population_changed: Condvar,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn Transport>, call_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            population_changed: Condvar::new(),
            transport,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Register a new connection for `identity`, creating the session on
    /// first contact or reattaching the existing one.
    pub fn on_connect(&self, identity: PeerId, connection: ConnectionId) -> Arc<PeerSession> {
        let (session, existing) = {
            let mut sessions = self.sessions.lock();
            match sessions.get(&identity) {
                Some(session) => (session.clone(), true),
                None => {
                    let session = Arc::new(PeerSession::new(
                        identity,
                        connection,
                        self.transport.clone(),
                        self.call_timeout,
                    ));
                    sessions.insert(identity, session.clone());
                    (session, false)
                }
            }
        };

        if existing {
            if let Some(previous) = session.on_reconnect(connection) {
                self.transport.close(previous);
            }
        } else {
            info!(peer = %identity, %connection, "📞 Phone connected");
        }

        self.population_changed.notify_all();
        session
    }

    pub fn on_disconnect(&self, identity: PeerId, connection: ConnectionId) {
        let Some(session) = self.session(&identity) else {
            debug!(peer = %identity, %connection, "Disconnect from unknown peer");
            return;
        };
        if session.on_disconnect(connection) {
            info!(peer = %identity, %connection, "📴 Phone disconnected");
        }
    }

    /// Route one inbound frame. Problems are logged and swallowed here so a
    /// bad frame from one peer never reaches a caller or the dispatch task.
    pub fn on_message(&self, identity: PeerId, connection: ConnectionId, raw: &str) {
        let Some(session) = self.session(&identity) else {
            warn!(peer = %identity, %connection, "Message from unregistered peer dropped");
            return;
        };
        if !session.is_current(connection) {
            debug!(peer = %identity, %connection, "Message on superseded connection dropped");
            return;
        }
        if let Err(e) = session.on_message(raw) {
            warn!(peer = %identity, %connection, "Dropping inbound message: {}", e);
        }
    }

    /// Block until at least `n` peers have registered. No timeout.
    pub fn wait_for_population(&self, n: usize) {
        let mut sessions = self.sessions.lock();
        while sessions.len() < n {
            self.population_changed.wait(&mut sessions);
        }
    }

    /// Bounded variant of `wait_for_population`. Returns whether the
    /// threshold was reached.
    pub fn wait_for_population_timeout(&self, n: usize, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_for_population(n);
            return true;
        };
        let mut sessions = self.sessions.lock();
        while sessions.len() < n {
            if self
                .population_changed
                .wait_until(&mut sessions, deadline)
                .timed_out()
            {
                return sessions.len() >= n;
            }
        }
        true
    }

    pub fn session(&self, identity: &PeerId) -> Option<Arc<PeerSession>> {
        self.sessions.lock().get(identity).cloned()
    }

    /// Snapshot of all sessions. Order is unspecified.
    pub fn sessions(&self) -> Vec<Arc<PeerSession>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.sessions()
            .iter()
            .filter(|s| s.is_connected())
            .count()
    }
}
