//! Session registry
//!
//! Owns the authoritative state of every session. The sessions map is only
//! locked for lookup/insert/remove; all mutation of a single session
//! serializes on that session's own mutex, so operations on different
//! sessions never contend. Connection handles are collected under the lock
//! and the fan-out happens after it is released; no lock is ever held
//! across a send, and delivery failure to one member never affects the rest.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::messages::{PeerSummary, ServerMessage};
use crate::presence;
use crate::session::{
    ClientId, ConnHandle, PeerRecord, Session, SessionId, generate_session_code, unix_millis,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use uuid::Uuid;

/// Why an identity or session went away. Grace-period expiry is a normal
/// transition, not an error, but observers render it differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartReason {
    Explicit,
    GraceExpired,
}

/// Typed notifications for in-process observers. The wire contract is
/// unaffected; these exist so other components can watch membership changes
/// without hooking the socket layer.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    SessionCreated {
        session_id: SessionId,
        host_id: ClientId,
    },
    PeerJoined {
        session_id: SessionId,
        client_id: ClientId,
        name: String,
    },
    PeerRemoved {
        session_id: SessionId,
        client_id: ClientId,
        reason: DepartReason,
    },
    PeerReconnected {
        session_id: SessionId,
        client_id: ClientId,
    },
    HostReconnected {
        session_id: SessionId,
        host_id: ClientId,
    },
    SessionDestroyed {
        session_id: SessionId,
        reason: DepartReason,
    },
}

/// Successful join, reported back to the joiner
#[derive(Debug)]
pub struct JoinOutcome {
    pub host_id: ClientId,
    pub started_at: u64,
    pub connected_peers: Vec<PeerSummary>,
}

/// Successful reconnect
#[derive(Debug)]
pub enum ReconnectOutcome {
    Host {
        connected_peers: Vec<PeerSummary>,
    },
    Peer {
        host_id: ClientId,
        name: String,
        connected_peers: Vec<PeerSummary>,
    },
}

pub struct Registry {
    pub(crate) config: RelayConfig,
    pub(crate) sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    /// Codes of destroyed sessions; never handed out again for the life of
    /// the process
    pub(crate) retired: RwLock<HashSet<SessionId>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new(config: RelayConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashSet::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) async fn lookup(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Open a new session with `host_id` as its host. Codes are collision
    /// checked against both live and retired sessions.
    pub async fn create_session(&self, host_id: ClientId, conn: ConnHandle) -> (SessionId, u64) {
        let started_at = unix_millis();

        let mut sessions = self.sessions.write().await;
        let session_id = {
            let retired = self.retired.read().await;
            loop {
                let code = generate_session_code();
                if !sessions.contains_key(&code) && !retired.contains(&code) {
                    break code;
                }
            }
        };
        sessions.insert(
            session_id.clone(),
            Arc::new(Mutex::new(Session::new(
                session_id.clone(),
                host_id.clone(),
                conn,
                started_at,
            ))),
        );
        drop(sessions);

        tracing::info!("Session created: {} by host: {}", session_id, host_id);
        self.emit(RegistryEvent::SessionCreated {
            session_id: session_id.clone(),
            host_id,
        });

        (session_id, started_at)
    }

    /// Add a peer to an existing session. The host is notified first (it
    /// opens the direct-channel offer), then the other peers; the joiner gets
    /// the pre-existing peer list back.
    pub async fn join_session(
        &self,
        session_id: &str,
        client_id: ClientId,
        name: String,
        conn: ConnHandle,
    ) -> Result<JoinOutcome, RelayError> {
        let session = self
            .lookup(session_id)
            .await
            .ok_or(RelayError::SessionNotFound)?;

        let (outcome, recipients) = {
            let mut s = session.lock().await;
            if s.host_id == client_id {
                // A host cannot appear in its own peer map
                tracing::warn!("Host {} attempted to join own session {}", client_id, session_id);
                return Err(RelayError::Unauthorized);
            }
            let existing = s.peer_summaries();
            let mut recipients = vec![s.host_conn.clone()];
            recipients.extend(s.peers.values().map(|p| p.conn.clone()));
            s.peers.insert(
                client_id.clone(),
                PeerRecord {
                    client_id: client_id.clone(),
                    name: name.clone(),
                    conn,
                },
            );
            (
                JoinOutcome {
                    host_id: s.host_id.clone(),
                    started_at: s.started_at,
                    connected_peers: existing,
                },
                recipients,
            )
        };

        let note = ServerMessage::PeerJoined {
            client_id: client_id.clone(),
            name: name.clone(),
            session_id: session_id.to_string(),
        };
        for conn in &recipients {
            conn.send(note.clone());
        }

        tracing::info!("Peer joined session {}: {} ({})", session_id, client_id, name);
        self.emit(RegistryEvent::PeerJoined {
            session_id: session_id.to_string(),
            client_id,
            name,
        });

        Ok(outcome)
    }

    /// Host-requested teardown. A non-host requester is ignored without a
    /// state change; destroying an already-gone session is a no-op.
    pub async fn destroy_session(&self, session_id: &str, requester: &str) {
        let Some(session) = self.lookup(session_id).await else {
            return;
        };
        {
            let s = session.lock().await;
            if s.host_id != requester {
                tracing::warn!(
                    "Unauthorized destroy of {} by {} ignored",
                    session_id,
                    requester
                );
                return;
            }
        }
        self.teardown_session(session_id, None, DepartReason::Explicit)
            .await;
    }

    /// Remove the session, cancel outstanding grace timers, and notify every
    /// member exactly once. When `require_grace_of` is set, the teardown only
    /// proceeds if that identity still has a pending grace timer, the
    /// cancel-then-check step of the timer race resolution.
    pub(crate) async fn teardown_session(
        &self,
        session_id: &str,
        require_grace_of: Option<&str>,
        reason: DepartReason,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(session_id).cloned() else {
            return false;
        };
        let mut s = session.lock().await;
        if let Some(identity) = require_grace_of {
            if s.pending_grace.remove(identity).is_none() {
                // Reinstated before the timer won the race
                return false;
            }
        }
        sessions.remove(session_id);
        s.destroyed = true;
        for (_, handle) in s.pending_grace.drain() {
            handle.abort();
        }
        let recipients = s.member_conns();
        drop(s);
        drop(sessions);

        self.retired.write().await.insert(session_id.to_string());

        for conn in &recipients {
            conn.send(ServerMessage::SessionEnded);
        }

        tracing::info!("Session destroyed: {} ({:?})", session_id, reason);
        self.emit(RegistryEvent::SessionDestroyed {
            session_id: session_id.to_string(),
            reason,
        });
        true
    }

    /// Delete a peer and fan out `peer-left` to the host and remaining peers.
    /// With `require_grace` the removal only proceeds if the peer's grace
    /// timer is still pending (eviction path); without it any pending timer
    /// is cancelled first (explicit path). Host departure never goes through
    /// here; it is always a session teardown.
    pub async fn remove_peer(
        &self,
        session_id: &str,
        client_id: &str,
        require_grace: bool,
        reason: DepartReason,
    ) -> bool {
        let Some(session) = self.lookup(session_id).await else {
            return false;
        };

        let mut s = session.lock().await;
        match s.pending_grace.remove(client_id) {
            Some(handle) if !require_grace => handle.abort(),
            Some(_) => {}
            None if require_grace => return false,
            None => {}
        }
        if s.peers.remove(client_id).is_none() {
            return false;
        }
        s.reconnect_log.remove(client_id);
        let recipients = s.member_conns();
        drop(s);

        let note = ServerMessage::PeerLeft {
            client_id: client_id.to_string(),
        };
        for conn in &recipients {
            conn.send(note.clone());
        }

        tracing::info!("Peer removed {} from session {} ({:?})", client_id, session_id, reason);
        self.emit(RegistryEvent::PeerRemoved {
            session_id: session_id.to_string(),
            client_id: client_id.to_string(),
            reason,
        });
        true
    }

    /// Reinstate a previously-assigned identity on a fresh connection.
    ///
    /// Cancel-then-check: the grace timer (if any) is cancelled and the
    /// membership verified under the session lock, so a timer that already
    /// fired makes this fail with `SessionNotFound` instead of resurrecting
    /// evicted state. An identity that is still `Active` (duplicate network
    /// race) is handled as a connection swap, last writer wins.
    pub async fn reconnect(
        &self,
        session_id: &str,
        client_id: &str,
        is_host: bool,
        conn: ConnHandle,
    ) -> Result<ReconnectOutcome, RelayError> {
        let session = self
            .lookup(session_id)
            .await
            .ok_or(RelayError::SessionNotFound)?;

        let (outcome, notes) = {
            let mut s = session.lock().await;

            // The host grace timer may have torn the session down between
            // the map lookup and this lock; that loss is definitive
            if s.destroyed {
                return Err(RelayError::SessionNotFound);
            }

            if !s.note_reconnect(client_id, self.config.reconnect_burst, self.config.reconnect_window)
            {
                tracing::warn!(
                    "Reconnect of {} to {} throttled (flapping)",
                    client_id,
                    session_id
                );
                return Err(RelayError::ReconnectThrottled);
            }

            if is_host {
                if s.host_id != client_id {
                    return Err(RelayError::SessionNotFound);
                }
                // The claim checked out; only now cancel the grace timer so a
                // bogus reconnect can never clear another identity's timer
                if let Some(handle) = s.pending_grace.remove(client_id) {
                    handle.abort();
                }
                s.host_conn = conn;
                let connected_peers = s.peer_summaries();
                let recipients: Vec<ConnHandle> =
                    s.peers.values().map(|p| p.conn.clone()).collect();
                let note = ServerMessage::HostReconnected {
                    host_id: client_id.to_string(),
                    session_id: session_id.to_string(),
                };
                (
                    ReconnectOutcome::Host { connected_peers },
                    recipients
                        .into_iter()
                        .map(|c| (c, note.clone()))
                        .collect::<Vec<_>>(),
                )
            } else {
                let name = match s.peers.get_mut(client_id) {
                    Some(peer) => {
                        // Identity and display name survive the reconnect;
                        // only the transport is swapped
                        peer.conn = conn;
                        peer.name.clone()
                    }
                    // Timer already fired: the slot is gone, do not resurrect
                    None => return Err(RelayError::SessionNotFound),
                };
                if let Some(handle) = s.pending_grace.remove(client_id) {
                    handle.abort();
                }
                let host_id = s.host_id.clone();
                let connected_peers: Vec<PeerSummary> = s
                    .peers
                    .values()
                    .filter(|p| p.client_id != client_id)
                    .map(|p| PeerSummary {
                        client_id: p.client_id.clone(),
                        name: p.name.clone(),
                    })
                    .collect();
                let note = ServerMessage::PeerReconnected {
                    client_id: client_id.to_string(),
                    name: name.clone(),
                    session_id: session_id.to_string(),
                };
                let mut notes = vec![(s.host_conn.clone(), note.clone())];
                notes.extend(
                    s.peers
                        .values()
                        .filter(|p| p.client_id != client_id)
                        .map(|p| (p.conn.clone(), note.clone())),
                );
                (
                    ReconnectOutcome::Peer {
                        host_id,
                        name,
                        connected_peers,
                    },
                    notes,
                )
            }
        };

        for (conn, note) in notes {
            conn.send(note);
        }

        match &outcome {
            ReconnectOutcome::Host { .. } => {
                tracing::info!("Host reconnected to {}: {}", session_id, client_id);
                self.emit(RegistryEvent::HostReconnected {
                    session_id: session_id.to_string(),
                    host_id: client_id.to_string(),
                });
            }
            ReconnectOutcome::Peer { .. } => {
                tracing::info!("Peer reconnected to {}: {}", session_id, client_id);
                self.emit(RegistryEvent::PeerReconnected {
                    session_id: session_id.to_string(),
                    client_id: client_id.to_string(),
                });
            }
        }

        Ok(outcome)
    }

    /// Transport-level disconnect of `conn_id`. Starts the grace timer for
    /// the identity unless the closing socket is stale (already swapped out
    /// by a reconnect), which keeps one timer per disconnected identity.
    pub async fn handle_disconnect(
        self: &Arc<Self>,
        session_id: &str,
        client_id: &str,
        conn_id: Uuid,
    ) {
        let Some(session) = self.lookup(session_id).await else {
            return;
        };
        let mut s = session.lock().await;

        let (is_host, current) = if s.host_id == client_id {
            (true, s.host_conn.conn_id)
        } else if let Some(peer) = s.peers.get(client_id) {
            (false, peer.conn.conn_id)
        } else {
            return;
        };
        if current != conn_id || s.pending_grace.contains_key(client_id) {
            return;
        }

        let window = if is_host {
            self.config.host_grace
        } else {
            self.config.peer_grace
        };
        presence::start_grace(self.clone(), &mut s, session_id, client_id, is_host, window);
    }

    /// Connection handle currently bound to `client_id` within the session,
    /// host slot included.
    pub(crate) async fn find_conn(
        &self,
        session_id: &str,
        client_id: &str,
    ) -> Result<ConnHandle, RelayError> {
        let session = self
            .lookup(session_id)
            .await
            .ok_or(RelayError::SessionNotFound)?;
        let s = session.lock().await;
        s.find_conn(client_id)
            .cloned()
            .ok_or(RelayError::ChannelUnavailable)
    }

    /// Number of identities currently sitting in a grace period, for
    /// observability and tests.
    pub async fn pending_grace_count(&self, session_id: &str) -> usize {
        match self.lookup(session_id).await {
            Some(session) => session.lock().await.pending_grace.len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_conn() -> ConnHandle {
        let (tx, _rx) = mpsc::channel(8);
        ConnHandle::new(Uuid::new_v4(), tx)
    }

    /// A session handle grabbed before teardown must read as gone afterwards,
    /// even though the `Arc` itself is still alive.
    #[tokio::test]
    async fn test_teardown_marks_retained_session_destroyed() {
        let registry = Registry::new(RelayConfig::default());
        let (session_id, _) = registry
            .create_session("host-1".to_string(), test_conn())
            .await;

        let retained = registry.lookup(&session_id).await.unwrap();
        assert!(!retained.lock().await.destroyed);

        registry.destroy_session(&session_id, "host-1").await;

        assert!(retained.lock().await.destroyed);
        assert!(registry.lookup(&session_id).await.is_none());
    }
}
