//! Injected handshake capability
//!
//! The coordination service only routes opaque offer/answer/candidate blobs;
//! something external has to turn them into an open channel. That something
//! is a `HandshakeDriver`. `PeerConnector` wires a driver to the signaling
//! stream, and `LoopbackHandshake` is the in-process driver used by tests:
//! its "handshake" just hands out linked `MemoryChannel` pairs.

use crate::channel::MemoryChannel;
use anyhow::{Result, anyhow};
use beam_core::client::RelayClient;
use beam_core::messages::ServerMessage;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// The three operations a handshake needs, plus a channel-ready event the
/// implementation emits out-of-band (typically an mpsc handed out at
/// construction). Blobs are never interpreted by the callers.
pub trait HandshakeDriver: Send + Sync + 'static {
    /// Start a handshake toward `peer_id`; returns the offer blob to relay.
    fn create_offer(&self, peer_id: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Answer a relayed offer; returns the answer blob to relay back.
    fn accept_offer(
        &self,
        peer_id: &str,
        offer: Value,
    ) -> impl Future<Output = Result<Value>> + Send;

    /// Complete the offering side with the relayed answer.
    fn accept_answer(
        &self,
        peer_id: &str,
        answer: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    fn add_remote_candidate(
        &self,
        peer_id: &str,
        candidate: Value,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Glue between the signaling stream and a handshake driver, mirroring the
/// client-side flow: a membership notification makes this side offer, a
/// relayed offer gets answered, a relayed answer completes the pair.
pub struct PeerConnector<H: HandshakeDriver> {
    client: RelayClient,
    driver: H,
    session_id: String,
}

impl<H: HandshakeDriver> PeerConnector<H> {
    pub fn new(client: RelayClient, driver: H, session_id: String) -> Self {
        Self {
            client,
            driver,
            session_id,
        }
    }

    /// Process signaling until the session ends or the connection drops.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let msg = match self.client.next().await {
                Ok(msg) => msg,
                Err(_) => break,
            };
            match msg {
                // Every already-connected member offers to the newcomer
                ServerMessage::PeerJoined { client_id, .. }
                | ServerMessage::PeerReconnected { client_id, .. } => {
                    let offer = self.driver.create_offer(&client_id).await?;
                    self.client
                        .signal_offer(&self.session_id, &client_id, offer)
                        .await?;
                }
                // A reinstated host re-offers to everyone it lost
                ServerMessage::ReconnectedHost { connected_peers, .. } => {
                    for peer in connected_peers {
                        let offer = self.driver.create_offer(&peer.client_id).await?;
                        self.client
                            .signal_offer(&self.session_id, &peer.client_id, offer)
                            .await?;
                    }
                }
                ServerMessage::SignalOffer { from, offer } => {
                    let answer = self.driver.accept_offer(&from, offer).await?;
                    self.client
                        .signal_answer(&self.session_id, &from, answer)
                        .await?;
                }
                ServerMessage::SignalAnswer { from, answer } => {
                    self.driver.accept_answer(&from, answer).await?;
                }
                ServerMessage::SignalIce { from, candidate } => {
                    self.driver.add_remote_candidate(&from, candidate).await?;
                }
                ServerMessage::SessionEnded => break,
                _ => {}
            }
        }
        Ok(())
    }
}

/// Shared meeting point for loopback handshakes within one process.
pub struct LoopbackHub {
    low_water: usize,
    pace: Option<Duration>,
    /// Offerer-side endpoints parked until the answer makes it back,
    /// keyed by (offerer, answerer)
    pending: Mutex<HashMap<(String, String), MemoryChannel>>,
}

impl LoopbackHub {
    pub fn new(low_water: usize, pace: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            low_water,
            pace,
            pending: Mutex::new(HashMap::new()),
        })
    }
}

/// Test driver: answers every offer by opening a `MemoryChannel` pair via
/// the hub. Channel-ready events carry the remote peer id and this side's
/// endpoint.
pub struct LoopbackHandshake {
    self_id: String,
    hub: Arc<LoopbackHub>,
    ready_tx: mpsc::UnboundedSender<(String, MemoryChannel)>,
}

impl LoopbackHandshake {
    pub fn new(
        self_id: String,
        hub: Arc<LoopbackHub>,
    ) -> (Self, mpsc::UnboundedReceiver<(String, MemoryChannel)>) {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        (
            Self {
                self_id,
                hub,
                ready_tx,
            },
            ready_rx,
        )
    }
}

impl HandshakeDriver for LoopbackHandshake {
    async fn create_offer(&self, peer_id: &str) -> Result<Value> {
        tracing::debug!("{} offering loopback channel to {}", self.self_id, peer_id);
        Ok(json!({ "kind": "loopback-offer", "from": self.self_id }))
    }

    async fn accept_offer(&self, peer_id: &str, _offer: Value) -> Result<Value> {
        let (offerer_end, answerer_end) =
            MemoryChannel::pair_with(self.hub.low_water, self.hub.pace);
        self.hub
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                (peer_id.to_string(), self.self_id.clone()),
                offerer_end,
            );
        self.ready_tx
            .send((peer_id.to_string(), answerer_end))
            .map_err(|_| anyhow!("channel-ready receiver dropped"))?;
        Ok(json!({ "kind": "loopback-answer", "from": self.self_id }))
    }

    async fn accept_answer(&self, peer_id: &str, _answer: Value) -> Result<()> {
        let endpoint = self
            .hub
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(self.self_id.clone(), peer_id.to_string()))
            .ok_or_else(|| anyhow!("no pending loopback handshake with {}", peer_id))?;
        self.ready_tx
            .send((peer_id.to_string(), endpoint))
            .map_err(|_| anyhow!("channel-ready receiver dropped"))?;
        Ok(())
    }

    async fn add_remote_candidate(&self, _peer_id: &str, _candidate: Value) -> Result<()> {
        // Loopback channels need no transport candidates
        Ok(())
    }
}
