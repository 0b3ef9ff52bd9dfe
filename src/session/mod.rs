//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! An RTSP session is a server-side state object created during SETUP and
//! destroyed by TEARDOWN, timeout, or connection loss. Generalized from the
//! teacher's `Session`/`SessionManager` (which only tracked a single
//! play-direction transport and a linear Ready→Playing↔Paused machine) to
//! also cover RECORD direction, all three transport carriers, and the
//! path/transport-mismatch invariants the spec requires on every request.

pub mod client;
pub mod server;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::RngExt;

use crate::error::{Result, RtspError};

pub use server::ServerSessionState;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Default session timeout (RFC 2326 §12.37), overridden by a client's
/// `Session: ...;timeout=N`.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Direction a session was set up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server delivers media to the client (DESCRIBE/PLAY).
    Play,
    /// Client publishes media to the server (ANNOUNCE/RECORD).
    Record,
}

/// Negotiated transport for one session (RFC 2326 §12.39, spec §4.5).
#[derive(Debug, Clone)]
pub enum SessionTransport {
    UdpUnicast {
        client_addr: SocketAddr,
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
    },
    UdpMulticast {
        group: std::net::Ipv4Addr,
        rtp_port: u16,
        rtcp_port: u16,
        ttl: u8,
    },
    TcpInterleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

impl SessionTransport {
    /// A coarse family tag used to detect a later SETUP requesting a
    /// different carrier than the one the session is already bound to
    /// (spec §4.8: SETUP after the first must keep the same family).
    pub fn family(&self) -> &'static str {
        match self {
            SessionTransport::UdpUnicast { .. } => "udp-unicast",
            SessionTransport::UdpMulticast { .. } => "udp-multicast",
            SessionTransport::TcpInterleaved { .. } => "tcp-interleaved",
        }
    }
}

/// A single RTSP session (RFC 2326 §3).
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Path the session is bound to (from DESCRIBE for Play, ANNOUNCE for Record).
    pub path: String,
    pub direction: Direction,
    pub transport: RwLock<Option<SessionTransport>>,
    pub state: RwLock<ServerSessionState>,
    pub timeout: Duration,
    last_activity: RwLock<Instant>,
}

impl Session {
    pub fn new(path: &str, direction: Direction) -> Self {
        let counter = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        let salt: u32 = rand::rng().random();
        let id = format!("{counter:08X}{salt:08X}");
        Session {
            id,
            path: path.to_string(),
            direction,
            transport: RwLock::new(None),
            state: RwLock::new(ServerSessionState::Init),
            timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.last_activity.read().elapsed() > self.timeout
    }

    pub fn set_transport(&self, transport: SessionTransport) {
        *self.transport.write() = Some(transport);
    }

    pub fn get_transport_family(&self) -> Option<&'static str> {
        self.transport.read().as_ref().map(SessionTransport::family)
    }

    pub fn state(&self) -> ServerSessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ServerSessionState) {
        tracing::debug!(session_id = %self.id, old = ?*self.state.read(), new = ?state, "session state transition");
        *self.state.write() = state;
    }

    /// Check that a request's path matches the one this session was bound
    /// to (spec §4.8 path-invariant).
    pub fn check_path(&self, requested: &str) -> Result<()> {
        if self.path != requested {
            return Err(RtspError::PathMismatch {
                session: self.id.clone(),
                bound: self.path.clone(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }

    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout.as_secs())
    }
}

/// Thread-safe table of active server-side sessions.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn create(&self, path: &str, direction: Direction) -> Arc<Session> {
        let session = Arc::new(Session::new(path, direction));
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        tracing::info!(session_id = %session.id, path, ?direction, "session created");
        session
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RtspError::SessionNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            tracing::info!(session_id = id, "session removed");
        }
        removed
    }

    pub fn remove_many(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Sweep sessions that have gone silent past their timeout
    /// (spec §4.9 liveness: server-side reaping of sessions with no
    /// request and, for UDP, no RTCP activity).
    pub fn reap_expired(&self) -> Vec<Arc<Session>> {
        let expired: Vec<Arc<Session>> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_expired())
            .cloned()
            .collect();
        for session in &expired {
            self.sessions.write().remove(&session.id);
            tracing::warn!(session_id = %session.id, "session timed out");
        }
        expired
    }

    pub fn playing(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state() == ServerSessionState::Playing)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup_round_trips() {
        let manager = SessionManager::new();
        let session = manager.create("/stream", Direction::Play);
        let found = manager.get(&session.id).unwrap();
        assert_eq!(found.path, "/stream");
    }

    #[test]
    fn missing_session_errors() {
        let manager = SessionManager::new();
        assert!(manager.get("nope").is_err());
    }

    #[test]
    fn path_mismatch_detected() {
        let session = Session::new("/stream", Direction::Play);
        assert!(session.check_path("/stream").is_ok());
        assert!(session.check_path("/other").is_err());
    }

    #[test]
    fn transport_family_mismatch_surfaced_via_family_tag() {
        let session = Session::new("/stream", Direction::Play);
        session.set_transport(SessionTransport::TcpInterleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
        });
        assert_eq!(session.get_transport_family(), Some("tcp-interleaved"));
    }

    #[test]
    fn remove_many_counts_only_existing() {
        let manager = SessionManager::new();
        let a = manager.create("/a", Direction::Play);
        assert_eq!(
            manager.remove_many(&[a.id.clone(), "missing".to_string()]),
            1
        );
    }
}
