//! Identity & connection table
//!
//! Maps each live transport connection to its logical identity and, once the
//! client enters a session, to that session. Pure bookkeeping; the registry
//! owns all policy.

use crate::session::{ClientId, SessionId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConnMeta {
    pub client_id: ClientId,
    pub session_id: Option<SessionId>,
    pub is_host: bool,
}

#[derive(Default)]
pub struct ConnectionTable {
    inner: RwLock<HashMap<Uuid, ConnMeta>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn_id: Uuid, client_id: ClientId) {
        let mut inner = self.inner.write().await;
        inner.insert(
            conn_id,
            ConnMeta {
                client_id,
                session_id: None,
                is_host: false,
            },
        );
    }

    /// Record which session the connection now belongs to.
    pub async fn bind_session(&self, conn_id: Uuid, session_id: SessionId, is_host: bool) {
        let mut inner = self.inner.write().await;
        if let Some(meta) = inner.get_mut(&conn_id) {
            meta.session_id = Some(session_id);
            meta.is_host = is_host;
        }
    }

    /// Swap the connection's identity to a reclaimed one after a reconnect.
    pub async fn rebind_identity(&self, conn_id: Uuid, client_id: ClientId) {
        let mut inner = self.inner.write().await;
        if let Some(meta) = inner.get_mut(&conn_id) {
            meta.client_id = client_id;
        }
    }

    pub async fn get(&self, conn_id: Uuid) -> Option<ConnMeta> {
        let inner = self.inner.read().await;
        inner.get(&conn_id).cloned()
    }

    /// Remove the connection, returning its last known binding.
    pub async fn remove(&self, conn_id: Uuid) -> Option<ConnMeta> {
        let mut inner = self.inner.write().await;
        inner.remove(&conn_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
