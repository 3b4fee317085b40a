//! Signaling relay
//!
//! Stateless forwarding of the three handshake blob kinds between two
//! identities of the same session. Payloads are never inspected, nothing is
//! buffered or reordered; a missing destination is a logged drop, and any
//! retry logic lives in the application layer above.

use crate::error::RelayError;
use crate::messages::ServerMessage;
use crate::registry::Registry;
use serde_json::Value;

/// The three opaque message kinds a handshake exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    fn wrap(self, from: &str, payload: Value) -> ServerMessage {
        match self {
            SignalKind::Offer => ServerMessage::SignalOffer {
                from: from.to_string(),
                offer: payload,
            },
            SignalKind::Answer => ServerMessage::SignalAnswer {
                from: from.to_string(),
                answer: payload,
            },
            SignalKind::Candidate => ServerMessage::SignalIce {
                from: from.to_string(),
                candidate: payload,
            },
        }
    }
}

/// Forward one signaling blob to `target` within `session_id`. Best-effort:
/// an unknown session or already-gone destination drops the message.
pub async fn relay(
    registry: &Registry,
    session_id: &str,
    from: &str,
    target: &str,
    kind: SignalKind,
    payload: Value,
) -> Result<(), RelayError> {
    match registry.find_conn(session_id, target).await {
        Ok(conn) => {
            tracing::debug!(
                "Forwarding {:?} from {} to {} in {}",
                kind,
                from,
                target,
                session_id
            );
            conn.send(kind.wrap(from, payload));
            Ok(())
        }
        Err(e) => {
            tracing::warn!(
                "Dropping {:?} from {} to {} in {}: {}",
                kind,
                from,
                target,
                session_id,
                e
            );
            Err(e)
        }
    }
}
