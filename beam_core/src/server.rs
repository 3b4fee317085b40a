//! WebSocket server for the coordination service
//!
//! One task per connection reads and dispatches client messages; a writer
//! task drains the connection's outbound queue, which is the only path any
//! component uses to reach this client.

use crate::auth;
use crate::config::RelayConfig;
use crate::connections::ConnectionTable;
use crate::error::RelayError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::registry::{ReconnectOutcome, Registry};
use crate::relay::{self, SignalKind};
use crate::session::{ClientId, ConnHandle, OUTBOUND_QUEUE};
use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared state handed to every connection handler. Explicitly constructed
/// and owned by the process; nothing here is a global.
pub struct ServerState {
    pub registry: Arc<Registry>,
    pub connections: ConnectionTable,
    auth_token: String,
}

impl ServerState {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let auth_token = config.auth_token.clone();
        Arc::new(Self {
            registry: Arc::new(Registry::new(config)),
            connections: ConnectionTable::new(),
            auth_token,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    token: Option<String>,
}

/// Build the axum router exposing the `/ws` endpoint.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// WebSocket upgrade handler. The credential is checked here; a bad token
/// still completes the upgrade but the socket is closed immediately with the
/// auth close code.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Query(query): Query<AuthQuery>,
) -> Response {
    match auth::check_token(query.token.as_deref(), &state.auth_token) {
        Ok(()) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(reason) => ws.on_upgrade(move |socket| auth::reject_socket(socket, reason)),
    }
}

/// Handle one client connection for its whole lifetime.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let conn_id = Uuid::new_v4();
    let mut client_id: ClientId = Uuid::new_v4().to_string();
    state.connections.register(conn_id, client_id.clone()).await;

    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let conn = ConnHandle::new(conn_id, out_tx);
    conn.send(ServerMessage::Welcome {
        client_id: client_id.clone(),
    });
    tracing::info!("Client connected: {}", client_id);

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let parsed: ClientMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::warn!("Unknown message from {}: {}", client_id, e);
                        continue;
                    }
                };
                if let Some(reclaimed) = dispatch(&state, &conn, &client_id, parsed).await {
                    client_id = reclaimed;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong/binary
            Err(e) => {
                tracing::warn!("WebSocket error for {}: {}", client_id, e);
                break;
            }
        }
    }

    if let Some(meta) = state.connections.remove(conn_id).await {
        if let Some(session_id) = meta.session_id {
            state
                .registry
                .handle_disconnect(&session_id, &meta.client_id, conn_id)
                .await;
        }
    }
    tracing::info!("Client disconnected: {}", client_id);

    // The registry may still hold stale clones of this connection's sender
    // until the grace period resolves; stop the writer now rather than
    // waiting for them to drop.
    writer.abort();
}

/// Route one client message. Returns the reclaimed identity when a reconnect
/// succeeded so the connection adopts it.
async fn dispatch(
    state: &Arc<ServerState>,
    conn: &ConnHandle,
    client_id: &str,
    msg: ClientMessage,
) -> Option<ClientId> {
    match msg {
        ClientMessage::CreateSession => {
            let (session_id, started_at) = state
                .registry
                .create_session(client_id.to_string(), conn.clone())
                .await;
            state
                .connections
                .bind_session(conn.conn_id, session_id.clone(), true)
                .await;
            conn.send(ServerMessage::SessionCreated {
                session_id,
                client_id: client_id.to_string(),
                started_at,
            });
            None
        }

        ClientMessage::JoinSession { session_id, name } => {
            match state
                .registry
                .join_session(&session_id, client_id.to_string(), name.clone(), conn.clone())
                .await
            {
                Ok(outcome) => {
                    state
                        .connections
                        .bind_session(conn.conn_id, session_id.clone(), false)
                        .await;
                    conn.send(ServerMessage::JoinedSession {
                        client_id: client_id.to_string(),
                        name,
                        host_id: outcome.host_id,
                        started_at: outcome.started_at,
                        connected_peers: outcome.connected_peers,
                    });
                }
                Err(RelayError::Unauthorized) => {}
                Err(e) => conn.send(ServerMessage::Error {
                    message: e.to_string(),
                }),
            }
            None
        }

        ClientMessage::DestroySession { session_id, .. } => {
            // Authorization comes from the connection's bound identity, not
            // from the id claimed in the payload
            state.registry.destroy_session(&session_id, client_id).await;
            None
        }

        ClientMessage::Reconnect {
            session_id,
            client_id: previous,
            is_host,
            name: _,
        } => {
            match state
                .registry
                .reconnect(&session_id, &previous, is_host, conn.clone())
                .await
            {
                Ok(ReconnectOutcome::Host { connected_peers }) => {
                    state
                        .connections
                        .rebind_identity(conn.conn_id, previous.clone())
                        .await;
                    state
                        .connections
                        .bind_session(conn.conn_id, session_id.clone(), true)
                        .await;
                    conn.send(ServerMessage::ReconnectedHost {
                        session_id,
                        connected_peers,
                        client_id: previous.clone(),
                    });
                    Some(previous)
                }
                Ok(ReconnectOutcome::Peer {
                    host_id,
                    name: _,
                    connected_peers,
                }) => {
                    state
                        .connections
                        .rebind_identity(conn.conn_id, previous.clone())
                        .await;
                    state
                        .connections
                        .bind_session(conn.conn_id, session_id.clone(), false)
                        .await;
                    conn.send(ServerMessage::Reconnected {
                        client_id: previous.clone(),
                        session_id,
                        connected_peers,
                        host_id,
                    });
                    Some(previous)
                }
                Err(e) => {
                    conn.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                    None
                }
            }
        }

        ClientMessage::Signal {
            target_id,
            payload,
            session_id,
        } => {
            let _ = relay::relay(
                &state.registry,
                &session_id,
                client_id,
                &target_id,
                SignalKind::Offer,
                payload,
            )
            .await;
            None
        }

        ClientMessage::SignalAnswer {
            target,
            answer,
            session_id,
        } => {
            let _ = relay::relay(
                &state.registry,
                &session_id,
                client_id,
                &target,
                SignalKind::Answer,
                answer,
            )
            .await;
            None
        }

        ClientMessage::SignalIce {
            target,
            candidate,
            session_id,
        } => {
            let _ = relay::relay(
                &state.registry,
                &session_id,
                client_id,
                &target,
                SignalKind::Candidate,
                candidate,
            )
            .await;
            None
        }
    }
}

/// Bind and serve until cancelled.
pub async fn start_relay_server(
    config: RelayConfig,
    cancel_token: Option<CancellationToken>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let state = ServerState::new(config);
    let router = create_router(state);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Coordination service listening on ws://{}/ws", addr);

    if let Some(ct) = cancel_token {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                ct.cancelled().await;
                tracing::info!("Coordination service shutting down gracefully");
            })
            .await?;
    } else {
        axum::serve(listener, router).await?;
    }

    Ok(())
}
