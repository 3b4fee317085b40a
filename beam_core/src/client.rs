//! Typed WebSocket client for the coordination service
//!
//! Thin wrapper over tokio-tungstenite used by integration tests and demo
//! tooling. It performs the welcome handshake on connect and exposes typed
//! send/receive; reconnection policy stays with the caller.

use crate::messages::{ClientMessage, PeerSummary, ServerMessage};
use crate::session::{ClientId, SessionId};
use anyhow::{Result, anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Identity assigned by the welcome message; replaced when a reconnect
    /// reclaims a previous one
    pub client_id: ClientId,
}

/// Fields of a successful join acknowledgement
#[derive(Debug)]
pub struct JoinedInfo {
    pub host_id: ClientId,
    pub started_at: u64,
    pub connected_peers: Vec<PeerSummary>,
}

impl RelayClient {
    /// Connect with the bearer credential and wait for the server's welcome.
    pub async fn connect(base_url: &str, token: &str) -> Result<Self> {
        let url = format!("{}/ws?token={}", base_url, token);
        let (ws, _) = connect_async(&url).await?;
        let mut client = Self {
            ws,
            client_id: String::new(),
        };
        match client.next().await? {
            ServerMessage::Welcome { client_id } => client.client_id = client_id,
            other => bail!("Expected welcome, got {:?}", other),
        }
        Ok(client)
    }

    pub async fn send(&mut self, msg: ClientMessage) -> Result<()> {
        let text = serde_json::to_string(&msg)?;
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Next server message, skipping transport-level frames. Errors once the
    /// connection is closed.
    pub async fn next(&mut self) -> Result<ServerMessage> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => bail!("Connection closed: {:?}", frame),
                _ => continue,
            }
        }
        bail!("Connection ended")
    }

    /// Create a session; expects the acknowledgement as the next message.
    pub async fn create_session(&mut self) -> Result<(SessionId, u64)> {
        self.send(ClientMessage::CreateSession).await?;
        match self.next().await? {
            ServerMessage::SessionCreated {
                session_id,
                started_at,
                ..
            } => Ok((session_id, started_at)),
            other => Err(anyhow!("Expected session-created, got {:?}", other)),
        }
    }

    /// Join a session by code; expects the acknowledgement (or an error
    /// report) as the next message.
    pub async fn join_session(&mut self, session_id: &str, name: &str) -> Result<JoinedInfo> {
        self.send(ClientMessage::JoinSession {
            session_id: session_id.to_string(),
            name: name.to_string(),
        })
        .await?;
        match self.next().await? {
            ServerMessage::JoinedSession {
                host_id,
                started_at,
                connected_peers,
                ..
            } => Ok(JoinedInfo {
                host_id,
                started_at,
                connected_peers,
            }),
            ServerMessage::Error { message } => Err(anyhow!(message)),
            other => Err(anyhow!("Expected joined-session, got {:?}", other)),
        }
    }

    pub async fn destroy_session(&mut self, session_id: &str) -> Result<()> {
        let client_id = self.client_id.clone();
        self.send(ClientMessage::DestroySession {
            session_id: session_id.to_string(),
            client_id,
        })
        .await
    }

    /// Ask the server to reinstate a previous identity on this connection.
    pub async fn reconnect(
        &mut self,
        session_id: &str,
        previous_id: &str,
        is_host: bool,
        name: &str,
    ) -> Result<()> {
        self.send(ClientMessage::Reconnect {
            session_id: session_id.to_string(),
            client_id: previous_id.to_string(),
            is_host,
            name: name.to_string(),
        })
        .await
    }

    pub async fn signal_offer(
        &mut self,
        session_id: &str,
        target_id: &str,
        payload: Value,
    ) -> Result<()> {
        self.send(ClientMessage::Signal {
            target_id: target_id.to_string(),
            payload,
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn signal_answer(
        &mut self,
        session_id: &str,
        target: &str,
        answer: Value,
    ) -> Result<()> {
        self.send(ClientMessage::SignalAnswer {
            target: target.to_string(),
            answer,
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn signal_ice(
        &mut self,
        session_id: &str,
        target: &str,
        candidate: Value,
    ) -> Result<()> {
        self.send(ClientMessage::SignalIce {
            target: target.to_string(),
            candidate,
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
