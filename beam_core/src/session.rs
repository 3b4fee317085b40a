//! Session and membership records

use crate::messages::ServerMessage;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Logical participant handle, stable across reconnects
pub type ClientId = String;

/// Human-typable 6-character session code
pub type SessionId = String;

/// Length of generated session codes
pub const SESSION_CODE_LEN: usize = 6;

const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Outbound queue depth per connection
pub const OUTBOUND_QUEUE: usize = 64;

/// Handle to one live transport connection.
///
/// Sends go into the connection's outbound queue and are drained by its
/// writer task, so fan-out never blocks on network I/O and each member sees
/// its notifications in the order they were queued.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub conn_id: Uuid,
    tx: mpsc::Sender<ServerMessage>,
}

impl ConnHandle {
    pub fn new(conn_id: Uuid, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { conn_id, tx }
    }

    /// Fire-and-forget delivery. A full queue or a dead connection drops the
    /// message; the grace-period machinery owns recovery from lost peers.
    pub fn send(&self, msg: ServerMessage) {
        if let Err(e) = self.tx.try_send(msg) {
            tracing::warn!("Dropping outbound message for {}: {}", self.conn_id, e);
        }
    }
}

/// One joined peer: identity, display name, and its current connection.
/// The connection is swapped in place on reconnect, never duplicated.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub client_id: ClientId,
    pub name: String,
    pub conn: ConnHandle,
}

/// Authoritative state of one session.
///
/// Invariant: `host_id` is never a key of `peers`.
pub struct Session {
    pub id: SessionId,
    pub host_id: ClientId,
    pub host_conn: ConnHandle,
    pub started_at: u64,
    pub peers: HashMap<ClientId, PeerRecord>,
    /// Grace timers for currently-disconnected identities
    pub pending_grace: HashMap<ClientId, AbortHandle>,
    /// Recent reconnect timestamps per identity, for the flap rate limit
    pub reconnect_log: HashMap<ClientId, VecDeque<Instant>>,
    /// Set by teardown under this session's lock. Anyone who grabbed the
    /// `Arc` before the registry dropped it must treat the session as gone.
    pub destroyed: bool,
}

impl Session {
    pub fn new(id: SessionId, host_id: ClientId, host_conn: ConnHandle, started_at: u64) -> Self {
        Self {
            id,
            host_id,
            host_conn,
            started_at,
            peers: HashMap::new(),
            pending_grace: HashMap::new(),
            reconnect_log: HashMap::new(),
            destroyed: false,
        }
    }

    /// Connection currently bound to `client_id`, checking the host slot
    /// first and the peer map second.
    pub fn find_conn(&self, client_id: &str) -> Option<&ConnHandle> {
        if self.host_id == client_id {
            return Some(&self.host_conn);
        }
        self.peers.get(client_id).map(|p| &p.conn)
    }

    pub fn peer_summaries(&self) -> Vec<crate::messages::PeerSummary> {
        self.peers
            .values()
            .map(|p| crate::messages::PeerSummary {
                client_id: p.client_id.clone(),
                name: p.name.clone(),
            })
            .collect()
    }

    /// All member connections: host slot plus every peer.
    pub fn member_conns(&self) -> Vec<ConnHandle> {
        let mut conns = Vec::with_capacity(self.peers.len() + 1);
        conns.push(self.host_conn.clone());
        conns.extend(self.peers.values().map(|p| p.conn.clone()));
        conns
    }

    /// Drop expired entries from the reconnect log and record a new attempt.
    /// Returns false when the identity has exhausted its burst budget.
    pub fn note_reconnect(&mut self, client_id: &str, burst: usize, window: Duration) -> bool {
        let now = Instant::now();
        let log = self.reconnect_log.entry(client_id.to_string()).or_default();
        while let Some(front) = log.front() {
            if now.duration_since(*front) > window {
                log.pop_front();
            } else {
                break;
            }
        }
        if log.len() >= burst {
            return false;
        }
        log.push_back(now);
        true
    }
}

/// Generate a candidate 6-character session code. Collision checking against
/// live and retired codes happens at the registry.
pub fn generate_session_code() -> SessionId {
    let mut rng = rand::rng();
    (0..SESSION_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..SESSION_CODE_ALPHABET.len());
            SESSION_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_code_format() {
        for _ in 0..50 {
            let code = generate_session_code();
            assert_eq!(code.len(), SESSION_CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_reconnect_rate_limit() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = ConnHandle::new(Uuid::new_v4(), tx);
        let mut session = Session::new("ABC123".into(), "host".into(), conn, 0);

        let window = Duration::from_secs(30);
        for _ in 0..5 {
            assert!(session.note_reconnect("peer-1", 5, window));
        }
        assert!(!session.note_reconnect("peer-1", 5, window));
        // A different identity has its own budget
        assert!(session.note_reconnect("peer-2", 5, window));
    }
}
