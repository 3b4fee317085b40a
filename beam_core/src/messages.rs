//! Coordination wire messages
//!
//! JSON text frames, tagged by a `type` field. The signaling payloads
//! (`payload`, `answer`, `candidate`) are opaque to the service and carried
//! as raw JSON values.

use crate::session::{ClientId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a `connectedPeers` list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub client_id: ClientId,
    pub name: String,
}

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Open a new session, becoming its host
    CreateSession,
    /// Join an existing session by code
    JoinSession { session_id: SessionId, name: String },
    /// Tear down a session (host only)
    DestroySession {
        session_id: SessionId,
        client_id: ClientId,
    },
    /// Reclaim a previous identity after a transport drop
    Reconnect {
        session_id: SessionId,
        client_id: ClientId,
        is_host: bool,
        name: String,
    },
    /// Forward an offer blob to another member of the session
    Signal {
        target_id: ClientId,
        payload: Value,
        session_id: SessionId,
    },
    /// Forward an answer blob to another member of the session
    SignalAnswer {
        target: ClientId,
        answer: Value,
        session_id: SessionId,
    },
    /// Forward a candidate blob to another member of the session
    SignalIce {
        target: ClientId,
        candidate: Value,
        session_id: SessionId,
    },
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First message on every connection, carrying the assigned identity
    Welcome { client_id: ClientId },
    SessionCreated {
        session_id: SessionId,
        client_id: ClientId,
        started_at: u64,
    },
    /// Join acknowledgement; `connected_peers` lists the peers that were
    /// already present so the joiner can render them without waiting for
    /// individual join events
    JoinedSession {
        client_id: ClientId,
        name: String,
        host_id: ClientId,
        started_at: u64,
        connected_peers: Vec<PeerSummary>,
    },
    PeerJoined {
        client_id: ClientId,
        name: String,
        session_id: SessionId,
    },
    PeerLeft { client_id: ClientId },
    SignalOffer { from: ClientId, offer: Value },
    SignalAnswer { from: ClientId, answer: Value },
    SignalIce { from: ClientId, candidate: Value },
    /// Peer-side reconnect acknowledgement
    Reconnected {
        client_id: ClientId,
        session_id: SessionId,
        connected_peers: Vec<PeerSummary>,
        host_id: ClientId,
    },
    /// Host-side reconnect acknowledgement; the host re-offers to every
    /// listed peer
    ReconnectedHost {
        session_id: SessionId,
        connected_peers: Vec<PeerSummary>,
        client_id: ClientId,
    },
    HostReconnected {
        host_id: ClientId,
        session_id: SessionId,
    },
    PeerReconnected {
        client_id: ClientId,
        name: String,
        session_id: SessionId,
    },
    SessionEnded,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tags() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"join-session","sessionId":"AB12CD","name":"Ada"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::JoinSession { session_id, name } => {
                assert_eq!(session_id, "AB12CD");
                assert_eq!(name, "Ada");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_signal_field_names() {
        let msg = ClientMessage::SignalAnswer {
            target: "abc".into(),
            answer: serde_json::json!({"sdp": "v=0"}),
            session_id: "XYZ123".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"signal-answer""#));
        assert!(json.contains(r#""target":"abc""#));
        assert!(json.contains(r#""sessionId":"XYZ123""#));
    }

    #[test]
    fn test_session_ended_is_bare() {
        let json = serde_json::to_string(&ServerMessage::SessionEnded).unwrap();
        assert_eq!(json, r#"{"type":"session-ended"}"#);
    }

    #[test]
    fn test_welcome_round_trip() {
        let json = r#"{"type":"welcome","clientId":"id-1"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Welcome { client_id } if client_id == "id-1"));
    }
}
