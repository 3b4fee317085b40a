//! Presence supervisor
//!
//! Per (session, identity) lifecycle: `Active -> GracePeriod -> {Active |
//! Evicted}`. A disconnect starts a bounded timer (10 s host, 5 s peer by
//! default); a reconnect inside the window cancels it and swaps the
//! connection; expiry evicts the identity and, for the host, destroys the
//! whole session. The timer handle lives in the session's `pending_grace`
//! map and is cancelled in the same critical section as the reconnect swap,
//! so a timer that already fired always wins over a late reconnect.

use crate::registry::{DepartReason, Registry};
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;

/// Start the grace timer for a just-disconnected identity. Caller holds the
/// session lock.
pub(crate) fn start_grace(
    registry: Arc<Registry>,
    session: &mut Session,
    session_id: &str,
    client_id: &str,
    is_host: bool,
    window: Duration,
) {
    tracing::info!(
        "{} disconnected: {} (grace {:?})",
        if is_host { "Host" } else { "Peer" },
        client_id,
        window
    );

    let sid = session_id.to_string();
    let cid = client_id.to_string();
    let task = tokio::spawn(async move {
        tokio::time::sleep(window).await;
        expire(&registry, &sid, &cid, is_host).await;
    });
    session
        .pending_grace
        .insert(client_id.to_string(), task.abort_handle());
}

/// Timer body. The grace entry is re-checked under the session lock inside
/// the registry teardown/removal, so a reconnect that won the race turns
/// this into a no-op.
async fn expire(registry: &Registry, session_id: &str, client_id: &str, is_host: bool) {
    if is_host {
        if registry
            .teardown_session(session_id, Some(client_id), DepartReason::GraceExpired)
            .await
        {
            tracing::info!(
                "Host {} never returned; session {} destroyed",
                client_id,
                session_id
            );
        }
    } else if registry
        .remove_peer(session_id, client_id, true, DepartReason::GraceExpired)
        .await
    {
        tracing::info!("Peer {} evicted from session {}", client_id, session_id);
    }
}
